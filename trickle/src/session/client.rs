//! Client side of a session
// (c) 2025 Ross Younger

use std::path::Path;
use std::time::Instant;

use indicatif::ProgressBar;
use tokio::io::AsyncWriteExt as _;
use tracing::{debug, trace, warn};

use super::{Role, Session, SessionError, SessionState};
use crate::protocol::common::{ReceivingStream, SendingStream};
use crate::protocol::message::{self, CLIENT_MAGIC};
use crate::protocol::{MAX_STRING_LEN, Opcode};
use crate::transfer::TransferStats;
use crate::transport::Connection;

/// Result of a successful client session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The server could not open the requested file. No local file was written.
    NotAvailable,
    /// The file was downloaded
    Complete(TransferStats),
}

/// Drives one download from the client side
#[derive(Debug)]
pub struct ClientSession<S: SendingStream, R: ReceivingStream> {
    session: Session<S, R>,
    progress: ProgressBar,
}

impl<S: SendingStream, R: ReceivingStream> ClientSession<S, R> {
    /// Constructor
    pub fn new(connection: Connection<S, R>) -> Self {
        Self {
            session: Session::new(connection, Role::Client),
            progress: ProgressBar::hidden(),
        }
    }

    /// Reports download progress to the given bar.
    /// Its length is set once the file size is known.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Current protocol state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Requests `remote_path` and writes it to `destination`.
    ///
    /// The destination is only created (or truncated) if the server says the file is available.
    /// If the file data does not arrive intact, the partial file is removed.
    /// On any error the connection is shut down without a farewell.
    pub async fn download(
        mut self,
        remote_path: &str,
        destination: &Path,
    ) -> Result<DownloadOutcome, SessionError> {
        let result = self.run(remote_path, destination).await;
        if result.is_err() {
            self.progress.abandon();
        }
        self.session.close().await;
        result
    }

    async fn run(
        &mut self,
        remote_path: &str,
        destination: &Path,
    ) -> Result<DownloadOutcome, SessionError> {
        trace!("send handshake");
        self.session
            .send(&message::handshake_request(CLIENT_MAGIC))
            .await?;
        self.session.advance(SessionState::HandshakeSent)?;
        let mut reply = self.session.receive_expected(Opcode::HandshakeResponse).await?;
        trace!("server magic {}", reply.read::<u16>());

        if remote_path.len() > MAX_STRING_LEN {
            debug!("requested path truncated to {MAX_STRING_LEN} bytes");
        }
        trace!("request {remote_path}");
        self.session
            .send(&message::download_request(remote_path))
            .await?;
        self.session.advance(SessionState::Transfer)?;
        let mut response = self.session.receive_expected(Opcode::DownloadResponse).await?;
        let available = response.read::<u8>() != 0;
        let size = response.read::<u64>();

        let outcome = if available {
            trace!("file available, {size} bytes");
            DownloadOutcome::Complete(self.receive_file(size, destination).await?)
        } else {
            trace!("file not available");
            DownloadOutcome::NotAvailable
        };

        trace!("farewell");
        self.session.send(&message::farewell()).await?;
        self.session.advance(SessionState::Farewell)?;
        let _ = self.session.receive_expected(Opcode::Farewell).await?;
        self.session.advance(SessionState::Closed)?;
        Ok(outcome)
    }

    async fn receive_file(
        &mut self,
        size: u64,
        destination: &Path,
    ) -> Result<TransferStats, SessionError> {
        let start = Instant::now();
        let mut file = tokio::fs::File::create(destination).await?;
        self.progress.set_length(size);
        let result = self.fill(&mut file, size).await;
        drop(file);
        let mut stats = match result {
            Ok(stats) => stats,
            Err(e) => {
                match tokio::fs::remove_file(destination).await {
                    Ok(()) => warn!("removed incomplete file {}", destination.display()),
                    Err(re) => warn!("incomplete file {} remains: {re}", destination.display()),
                }
                return Err(e);
            }
        };
        stats.elapsed = start.elapsed();
        self.progress.finish_and_clear();
        trace!("received {} bytes in {} chunks", stats.bytes, stats.chunks);
        Ok(stats)
    }

    /// Writes exactly `size` bytes of incoming data to `file`
    async fn fill(
        &mut self,
        file: &mut tokio::fs::File,
        size: u64,
    ) -> Result<TransferStats, SessionError> {
        let mut stats = TransferStats::default();

        while stats.bytes < size {
            let packet = match self.session.receive_expected(Opcode::DownloadData).await {
                Ok(p) => p,
                Err(SessionError::PeerClosed(_) | SessionError::TimedOut(_)) => {
                    return Err(SessionError::ShortTransfer {
                        expected: size,
                        received: stats.bytes,
                    });
                }
                Err(e) => return Err(e),
            };
            let chunk = packet.payload();
            stats.bytes += chunk.len() as u64;
            stats.chunks += 1;
            if stats.bytes > size {
                return Err(SessionError::Overrun {
                    expected: size,
                    received: stats.bytes,
                });
            }
            file.write_all(chunk).await?;
            file.flush().await?;
            self.progress.inc(chunk.len() as u64);
        }
        file.sync_all().await?;
        Ok(stats)
    }
}
