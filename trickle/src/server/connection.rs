//! Handler for one accepted connection
// (c) 2024 Ross Younger

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ServerSettings;
use crate::protocol::common::TcpStreamPair;
use crate::session::{ServeOutcome, ServerSession};
use crate::transport::Connection;
use crate::util::stats::summary;

/// Runs one session to completion on an accepted connection.
///
/// Returns whether the session succeeded. Failures are logged here.
pub(super) async fn handle_connection(
    stream: TcpStream,
    settings: &ServerSettings,
    cancel: CancellationToken,
) -> bool {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("could not set TCP_NODELAY: {e}");
    }
    let connection =
        Connection::new(TcpStreamPair::from(stream), settings.policy).with_cancellation(cancel);
    let session = ServerSession::new(connection, settings.root.clone(), settings.throttle);
    match session.serve().await {
        Ok(ServeOutcome::Sent { path, stats }) => {
            info!("sent {path}: {}", summary(&stats));
            true
        }
        Ok(ServeOutcome::NotAvailable { path }) => {
            info!("{path} not available");
            true
        }
        Err(e) => {
            warn!("session failed: {e:#}");
            false
        }
    }
}
