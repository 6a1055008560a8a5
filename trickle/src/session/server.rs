//! Server side of a session
// (c) 2025 Ross Younger

use std::path::{Component, Path, PathBuf};

use tokio::fs::File;
use tracing::{debug, trace};

use super::{Role, Session, SessionError, SessionState};
use crate::protocol::Opcode;
use crate::protocol::common::{ReceivingStream, SendingStream};
use crate::protocol::message::{self, SERVER_MAGIC};
use crate::transfer::{self, Throttle, TransferStats};
use crate::transport::Connection;

/// Result of a successful server session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeOutcome {
    /// The requested file could not be opened, and the client was told so
    NotAvailable {
        /// Path as requested
        path: String,
    },
    /// The file was sent
    Sent {
        /// Path as requested
        path: String,
        /// Transfer statistics
        stats: TransferStats,
    },
}

/// Serves one download
#[derive(Debug)]
pub struct ServerSession<S: SendingStream, R: ReceivingStream> {
    session: Session<S, R>,
    root: PathBuf,
    throttle: Throttle,
}

impl<S: SendingStream, R: ReceivingStream> ServerSession<S, R> {
    /// Constructor. Requested paths are resolved against `root`.
    pub fn new(connection: Connection<S, R>, root: PathBuf, throttle: Throttle) -> Self {
        Self {
            session: Session::new(connection, Role::Server),
            root,
            throttle,
        }
    }

    /// Current protocol state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Runs the session to completion.
    ///
    /// On any error the connection is shut down without a reply.
    pub async fn serve(mut self) -> Result<ServeOutcome, SessionError> {
        let result = self.run().await;
        self.session.close().await;
        result
    }

    async fn run(&mut self) -> Result<ServeOutcome, SessionError> {
        let mut hello = self.session.receive_expected(Opcode::HandshakeRequest).await?;
        trace!("client magic {}", hello.read::<u16>());
        self.session.advance(SessionState::HandshakeReceived)?;
        self.session
            .send(&message::handshake_response(SERVER_MAGIC))
            .await?;

        let mut request = self.session.receive_expected(Opcode::DownloadRequest).await?;
        let path = request.read_string();
        self.session.advance(SessionState::Transfer)?;
        debug!("requested {path:?}");

        let outcome = if let Some((mut file, size)) = self.open(&path).await {
            self.session
                .send(&message::download_response(true, size))
                .await?;
            let connection = self.session.connection_mut();
            let stats = transfer::send_payload(connection, &mut file, size, self.throttle).await?;
            ServeOutcome::Sent { path, stats }
        } else {
            self.session
                .send(&message::download_response(false, 0))
                .await?;
            ServeOutcome::NotAvailable { path }
        };

        let _ = self.session.receive_expected(Opcode::Farewell).await?;
        self.session.advance(SessionState::Farewell)?;
        self.session.send(&message::farewell()).await?;
        self.session.advance(SessionState::Closed)?;
        Ok(outcome)
    }

    /// Opens a requested file, returning it with its size.
    /// Anything that cannot be opened as a regular file under the root is unavailable.
    async fn open(&self, requested: &str) -> Option<(File, u64)> {
        let path = self.resolve(requested)?;
        let file = match File::open(&path).await {
            Ok(f) => f,
            Err(e) => {
                debug!("cannot open {}: {e}", path.display());
                return None;
            }
        };
        match file.metadata().await {
            Ok(meta) if meta.is_dir() => {
                debug!("{} is a directory", path.display());
                None
            }
            Ok(meta) => Some((file, meta.len())),
            Err(e) => {
                debug!("cannot stat {}: {e}", path.display());
                None
            }
        }
    }

    /// Maps a requested path onto the root.
    /// Absolute paths and parent directory components are refused.
    fn resolve(&self, requested: &str) -> Option<PathBuf> {
        let relative = Path::new(requested);
        if relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            Some(self.root.join(relative))
        } else {
            debug!("refusing {requested:?}: outside the served directory");
            None
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use std::path::Path;
    use std::time::Duration;

    use assertables::assert_matches;
    use pretty_assertions::assert_eq;

    use super::{ServeOutcome, ServerSession};
    use crate::protocol::{Opcode, Packet, message};
    use crate::session::client::test::quick_policy;
    use crate::session::{ClientSession, DownloadOutcome, SessionError};
    use crate::transfer::Throttle;
    use crate::transport::{Connection, Received};
    use crate::util::test_protocol::test_plumbing;

    fn throttle() -> Throttle {
        Throttle::new(100, Duration::from_millis(1))
    }

    async fn run_pair(
        root: &Path,
        request: &str,
        dest: &Path,
    ) -> (
        Result<DownloadOutcome, SessionError>,
        Result<ServeOutcome, SessionError>,
    ) {
        let (a, b) = test_plumbing();
        let client = ClientSession::new(Connection::new(a, quick_policy()));
        let server = ServerSession::new(
            Connection::new(b, quick_policy()),
            root.to_path_buf(),
            throttle(),
        );
        tokio::join!(client.download(request, dest), server.serve())
    }

    #[tokio::test]
    async fn serve_file() {
        let dir = tempfile::tempdir().unwrap();
        let contents: Vec<u8> = (0..5000u32).map(|i| (i * 7 % 256) as u8).collect();
        std::fs::write(dir.path().join("src.bin"), &contents).unwrap();
        let dest = dir.path().join("dest.bin");

        let (c, s) = run_pair(dir.path(), "src.bin", &dest).await;
        let DownloadOutcome::Complete(cstats) = c.unwrap() else {
            panic!("download failed");
        };
        let ServeOutcome::Sent { path, stats } = s.unwrap() else {
            panic!("serve failed");
        };
        assert_eq!(path, "src.bin");
        assert_eq!(stats.bytes, 5000);
        assert_eq!(stats.chunks, 50);
        assert_eq!(cstats.bytes, 5000);
        assert_eq!(std::fs::read(&dest).unwrap(), contents);
    }

    #[tokio::test]
    async fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("dest.bin");
        let (c, s) = run_pair(dir.path(), "nope", &dest).await;
        assert_eq!(c.unwrap(), DownloadOutcome::NotAvailable);
        assert_eq!(
            s.unwrap(),
            ServeOutcome::NotAvailable {
                path: "nope".into()
            }
        );
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn directory_is_not_available() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let dest = dir.path().join("dest.bin");
        let (c, s) = run_pair(dir.path(), "sub", &dest).await;
        assert_eq!(c.unwrap(), DownloadOutcome::NotAvailable);
        assert_matches!(s.unwrap(), ServeOutcome::NotAvailable { .. });
    }

    #[tokio::test]
    async fn paths_outside_root_are_not_available() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        let secret = dir.path().join("secret");
        std::fs::write(&secret, b"not for you").unwrap();
        let dest = dir.path().join("dest.bin");

        for request in [
            "../secret".to_string(),
            "sub/../../secret".to_string(),
            secret.to_string_lossy().into_owned(),
        ] {
            let (c, s) = run_pair(&root, &request, &dest).await;
            assert_eq!(c.unwrap(), DownloadOutcome::NotAvailable, "{request}");
            assert_eq!(s.unwrap(), ServeOutcome::NotAvailable { path: request });
            assert!(!dest.exists());
        }
    }

    #[tokio::test]
    async fn nested_path_is_served() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/f.txt"), b"hello").unwrap();
        let dest = dir.path().join("dest.bin");
        let (c, _) = run_pair(dir.path(), "./sub/f.txt", &dest).await;
        assert_matches!(c.unwrap(), DownloadOutcome::Complete(_));
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn request_before_handshake() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = test_plumbing();
        let mut client = Connection::new(a, quick_policy());
        let server = ServerSession::new(
            Connection::new(b, quick_policy()),
            dir.path().to_path_buf(),
            throttle(),
        );
        client
            .send(&message::download_request("whatever"))
            .await
            .unwrap();
        let result = server.serve().await;
        assert_matches!(
            result.unwrap_err(),
            SessionError::UnexpectedOpcode {
                expected: Opcode::HandshakeRequest,
                received: 2
            }
        );
        // no reply, just closure
        assert_matches!(client.receive().await.unwrap(), Received::Closed);
    }

    #[tokio::test]
    async fn unknown_opcode() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = test_plumbing();
        let mut client = Connection::new(a, quick_policy());
        let server = ServerSession::new(
            Connection::new(b, quick_policy()),
            dir.path().to_path_buf(),
            throttle(),
        );
        client
            .send(&Packet::with_raw_opcode(99, 0))
            .await
            .unwrap();
        assert_matches!(
            server.serve().await.unwrap_err(),
            SessionError::UnexpectedOpcode { received: 99, .. }
        );
    }

    #[tokio::test]
    async fn client_vanishes() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = test_plumbing();
        let mut client = Connection::new(a, quick_policy());
        let server = ServerSession::new(
            Connection::new(b, quick_policy()),
            dir.path().to_path_buf(),
            throttle(),
        );
        client
            .send(&message::handshake_request(1337))
            .await
            .unwrap();
        client.close().await;
        assert_matches!(
            server.serve().await.unwrap_err(),
            SessionError::PeerClosed(Opcode::DownloadRequest)
        );
    }
}
