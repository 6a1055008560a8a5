//! Accepts connections and runs a session for each
// (c) 2024 Ross Younger

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument as _, debug, error, info, trace, warn};

use super::connection::handle_connection;
use crate::config::Configuration;
use crate::transfer::Throttle;
use crate::transport::ReceivePolicy;
use crate::util::session_span;

/// Everything a server needs to know to serve sessions
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Requested paths are resolved against this directory
    pub root: PathBuf,
    /// Pacing of file data
    pub throttle: Throttle,
    /// Receive timing for each session
    pub policy: ReceivePolicy,
    /// How often the accept loop checks for shutdown
    pub accept_poll: Duration,
    /// Maximum concurrent sessions; 0 means unlimited
    pub max_sessions: u32,
    /// How long sessions in progress may run on after shutdown is requested
    pub shutdown_grace: Duration,
}

impl ServerSettings {
    /// Settings with system default tuning
    #[must_use]
    pub fn new(root: PathBuf, throttle: Throttle) -> Self {
        Self::from_config(Configuration::system_default(), root, throttle)
    }

    /// Settings taken from a configuration
    #[must_use]
    pub fn from_config(config: &Configuration, root: PathBuf, throttle: Throttle) -> Self {
        Self {
            root,
            throttle,
            policy: config.receive_policy(),
            accept_poll: config.accept_poll(),
            max_sessions: config.max_sessions,
            shutdown_grace: config.shutdown_grace(),
        }
    }
}

/// Session counts over the life of a server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Sessions started
    pub started: u64,
    /// Sessions currently running
    pub active: u64,
    /// Sessions that ended in error
    pub failed: u64,
}

#[derive(Debug, Default)]
struct SessionCounters {
    started: AtomicU64,
    active: AtomicU64,
    failed: AtomicU64,
}

impl SessionCounters {
    fn snapshot(&self) -> SessionStats {
        SessionStats {
            started: self.started.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Requests shutdown of a running [`ConnectionManager`] and observes its counters.
///
/// Cloneable; may be used from any task.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    running: Arc<AtomicBool>,
    counters: Arc<SessionCounters>,
}

impl ShutdownHandle {
    /// Asks the server to stop accepting connections.
    ///
    /// This takes effect within one accept poll interval.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Whether shutdown has been requested
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        !self.running.load(Ordering::Relaxed)
    }

    /// Current session counts
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }
}

/// The server's accept loop.
///
/// Each accepted connection is served by its own task. At most `max_sessions` run at once;
/// further connections wait in the listen backlog.
#[derive(Debug)]
pub struct ConnectionManager {
    listener: TcpListener,
    settings: Arc<ServerSettings>,
    running: Arc<AtomicBool>,
    counters: Arc<SessionCounters>,
    cancel: CancellationToken,
}

impl ConnectionManager {
    /// Binds the listening socket
    pub async fn bind(addr: SocketAddr, settings: ServerSettings) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            settings: Arc::new(settings),
            running: Arc::new(AtomicBool::new(true)),
            counters: Arc::default(),
            cancel: CancellationToken::new(),
        })
    }

    /// The address actually bound
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// A handle which may be used to stop the server
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            running: self.running.clone(),
            counters: self.counters.clone(),
        }
    }

    /// Accepts and serves connections until shutdown is requested.
    ///
    /// Sessions in progress at shutdown are given the grace period to finish, then cancelled.
    /// Any that have not wound up after a second grace period are aborted and counted as failed.
    pub async fn run(self) -> SessionStats {
        let limit = match self.settings.max_sessions {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n as usize))),
        };
        let mut workers = JoinSet::new();
        let mut next_id = 0u64;

        while self.running.load(Ordering::Relaxed) {
            while let Some(result) = workers.try_join_next() {
                log_join(result);
            }

            let permit = match &limit {
                None => None,
                Some(sem) => {
                    match timeout(self.settings.accept_poll, sem.clone().acquire_owned()).await {
                        Ok(Ok(p)) => Some(p),
                        Ok(Err(_)) => break, // semaphore closed
                        Err(_) => continue,  // at capacity; check for shutdown
                    }
                }
            };

            let (stream, peer) =
                match timeout(self.settings.accept_poll, self.listener.accept()).await {
                    Err(_) => continue,
                    Ok(Err(e)) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                    Ok(Ok(s)) => s,
                };
            if !self.running.load(Ordering::Relaxed) {
                debug!("shutting down; dropping connection from {peer}");
                break;
            }

            next_id += 1;
            let _ = self.counters.started.fetch_add(1, Ordering::Relaxed);
            let _ = self.counters.active.fetch_add(1, Ordering::Relaxed);
            let _ = workers.spawn(
                self.worker(stream, peer, permit)
                    .instrument(session_span(next_id, peer)),
            );
        }

        self.drain(workers).await;
        let stats = self.counters.snapshot();
        debug!("server stopped: {stats:?}");
        stats
    }

    fn worker(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        permit: Option<tokio::sync::OwnedSemaphorePermit>,
    ) -> impl Future<Output = ()> + Send + use<> {
        let settings = self.settings.clone();
        let counters = self.counters.clone();
        let cancel = self.cancel.child_token();
        async move {
            let _permit = permit;
            trace!("accepted connection from {peer}");
            if !handle_connection(stream, &settings, cancel).await {
                let _ = counters.failed.fetch_add(1, Ordering::Relaxed);
            }
            let _ = counters.active.fetch_sub(1, Ordering::Relaxed);
        }
    }

    async fn drain(&self, mut workers: JoinSet<()>) {
        if workers.is_empty() {
            return;
        }
        info!(
            "waiting up to {:?} for {} session(s) to finish",
            self.settings.shutdown_grace,
            workers.len()
        );
        if self.join_within(&mut workers).await {
            return;
        }
        warn!("cancelling {} session(s)", workers.len());
        self.cancel.cancel();
        if self.join_within(&mut workers).await {
            return;
        }
        error!("aborting {} unresponsive session(s)", workers.len());
        workers.abort_all();
        while let Some(result) = workers.join_next().await {
            if matches!(&result, Err(e) if e.is_cancelled()) {
                let _ = self.counters.active.fetch_sub(1, Ordering::Relaxed);
                let _ = self.counters.failed.fetch_add(1, Ordering::Relaxed);
            } else {
                log_join(result);
            }
        }
    }

    /// Waits up to the shutdown grace period for all workers. True if they all finished.
    async fn join_within(&self, workers: &mut JoinSet<()>) -> bool {
        timeout(self.settings.shutdown_grace, async {
            while let Some(result) = workers.join_next().await {
                log_join(result);
            }
        })
        .await
        .is_ok()
    }
}

fn log_join(result: Result<(), JoinError>) {
    if let Err(e) = result {
        error!("session task failed: {e}");
    }
}
