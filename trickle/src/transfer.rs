// (c) 2025 Ross Younger

//! Rate-limited chunked payload streaming
//!
//! The server sends a file as a series of `DOWNLOAD_DATA` packets, each at most
//! [`Throttle::chunk_bytes`] long, pausing for the throttle interval after each one.
//! Throughput is therefore capped at roughly the configured speed limit.

use std::time::{Duration, Instant};

use anyhow::ensure;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt as _};
use tracing::trace;

use crate::protocol::common::{ReceivingStream, SendingStream};
use crate::protocol::{MAX_PAYLOAD_SIZE, message};
use crate::transport::{Connection, TransportError};

/// Bytes per kilobyte, for the purposes of the speed limit
const BYTES_PER_KB: f64 = 1000.0;

/// Per-chunk budget and pacing for a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    speed_limit: u64,
    interval: Duration,
}

impl Throttle {
    /// Constructor. `speed_limit` is in kilobytes (1000 bytes) per second.
    #[must_use]
    pub fn new(speed_limit: u64, interval: Duration) -> Self {
        Self {
            speed_limit,
            interval,
        }
    }

    /// Speed limit in kilobytes per second
    #[must_use]
    pub fn speed_limit(&self) -> u64 {
        self.speed_limit
    }

    /// Delay after each chunk
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The number of bytes sent per interval, rounded to the nearest byte
    #[must_use]
    pub fn chunk_bytes(&self) -> u64 {
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let chunk =
            (self.speed_limit as f64 * BYTES_PER_KB * self.interval.as_secs_f64()).round() as u64;
        chunk
    }

    /// Checks that the throttle yields a usable chunk size
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.speed_limit > 0, "speed limit must be greater than zero");
        ensure!(!self.interval.is_zero(), "send interval must be greater than zero");
        let chunk = self.chunk_bytes();
        ensure!(
            chunk > 0,
            "speed limit {}kB/s with interval {:?} gives an empty chunk; raise one of them",
            self.speed_limit,
            self.interval
        );
        ensure!(
            chunk <= u64::from(MAX_PAYLOAD_SIZE),
            "speed limit {}kB/s with interval {:?} gives a chunk of {chunk} bytes, above the {MAX_PAYLOAD_SIZE} byte limit",
            self.speed_limit,
            self.interval
        );
        Ok(())
    }
}

/// Statistics of a completed transfer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Payload bytes transferred
    pub bytes: u64,
    /// Number of `DOWNLOAD_DATA` packets
    pub chunks: u64,
    /// Wall-clock duration
    pub elapsed: Duration,
}

/// Errors arising while streaming a payload
#[derive(Debug, Error)]
pub enum TransferError {
    /// Reading the source failed
    #[error("failed to read source")]
    Source(#[source] std::io::Error),
    /// The source ran out before the announced size was reached
    #[error("source ended after {sent} of {expected} bytes")]
    SourceEnded {
        /// Bytes sent before the source ended
        sent: u64,
        /// Bytes announced to the peer
        expected: u64,
    },
    /// The throttle yields a chunk size that cannot be used
    #[error("invalid chunk size {0}")]
    BadChunkSize(u64),
    /// Sending failed
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Streams exactly `size` bytes from `source` as `DOWNLOAD_DATA` packets, pacing them according to `throttle`.
///
/// The last chunk is sized to what remains. Nothing is sent when `size` is zero.
pub async fn send_payload<S, R, F>(
    connection: &mut Connection<S, R>,
    source: &mut F,
    size: u64,
    throttle: Throttle,
) -> Result<TransferStats, TransferError>
where
    S: SendingStream,
    R: ReceivingStream,
    F: AsyncRead + Unpin,
{
    let chunk_limit = throttle.chunk_bytes();
    if chunk_limit == 0 || chunk_limit > u64::from(MAX_PAYLOAD_SIZE) {
        return Err(TransferError::BadChunkSize(chunk_limit));
    }
    let buffer_len = usize::try_from(chunk_limit.min(size))
        .map_err(|_| TransferError::BadChunkSize(chunk_limit))?;
    let mut buffer = vec![0u8; buffer_len];

    let start = Instant::now();
    let mut stats = TransferStats::default();
    while stats.bytes < size {
        #[allow(clippy::cast_possible_truncation)] // bounded by buffer_len
        let want = (size - stats.bytes).min(chunk_limit) as usize;
        let chunk = &mut buffer[..want];
        if let Err(e) = source.read_exact(chunk).await {
            return Err(if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TransferError::SourceEnded {
                    sent: stats.bytes,
                    expected: size,
                }
            } else {
                TransferError::Source(e)
            });
        }
        let packet = message::download_data(chunk).map_err(TransportError::from)?;
        connection.send(&packet).await?;
        stats.bytes += want as u64;
        stats.chunks += 1;
        trace!("chunk {}: {want} bytes, {}/{size} sent", stats.chunks, stats.bytes);
        connection.pause(throttle.interval()).await?;
    }
    stats.elapsed = start.elapsed();
    Ok(stats)
}
