// (c) 2025 Ross Younger

//! Packet transport over a byte stream
//!
//! A [`Connection`] owns one byte stream pair and the [`Reassembler`] for its inbound side.
//! It sends complete packets, and receives them according to a [`ReceivePolicy`].
//!
//! # Receive policy
//!
//! A receive call first waits for data in *normal* mode: up to `idle_attempts` waits of
//! `idle_timeout` each. As soon as a packet completes, the call switches to *burst* mode,
//! in which it keeps reading for as long as data keeps arriving promptly (each wait is
//! `burst_timeout`, and `burst_attempts` consecutive empty waits end the call).
//! This drains a run of back-to-back packets in one call, up to the queue limits
//! ([`MAX_QUEUED_PACKETS`] packets or [`MAX_QUEUED_BYTES`] bytes of payload).
//! Completed packets are then handed out one at a time, oldest first.
//!
//! # Sending
//!
//! A send that cannot complete within the policy's [`max_idle`](ReceivePolicy::max_idle)
//! fails with [`TransportError::SendTimedOut`]: a peer that stops reading is treated
//! the same as one that stops writing.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::protocol::common::{ReceivingStream, SendReceivePair, SendingStream};
use crate::protocol::{MAX_PAYLOAD_SIZE, Packet, PacketError, Reassembler};

/// Size of the buffer used for each read from the stream
pub const RECV_BUFFER_SIZE: usize = 4096;

/// Burst draining stops once this many completed packets are queued
pub const MAX_QUEUED_PACKETS: usize = 256;

/// Burst draining stops once this much payload is queued
pub const MAX_QUEUED_BYTES: usize = 4 * MAX_PAYLOAD_SIZE as usize;

/// Errors arising on a [`Connection`]
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying stream failed
    #[error("connection I/O failed")]
    Io(#[from] std::io::Error),
    /// The peer sent something that is not a packet
    #[error("malformed packet")]
    Malformed(#[from] PacketError),
    /// A packet was offered for sending before its payload was complete
    #[error("refusing to send incomplete packet ({written} of {declared} payload bytes)")]
    IncompletePacket {
        /// Declared payload length
        declared: usize,
        /// Payload bytes actually written
        written: usize,
    },
    /// The peer did not accept a packet in time
    #[error("timed out sending to peer")]
    SendTimedOut,
    /// The operation was cancelled from outside
    #[error("cancelled")]
    Cancelled,
}

/// Timing rules for [`Connection::receive`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivePolicy {
    /// Wait per attempt in normal mode
    pub idle_timeout: Duration,
    /// Number of normal mode waits before giving up
    pub idle_attempts: u32,
    /// Wait per attempt once a packet has completed
    pub burst_timeout: Duration,
    /// Consecutive empty burst mode waits before returning
    pub burst_attempts: u32,
}

impl Default for ReceivePolicy {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(3),
            idle_attempts: 50,
            burst_timeout: Duration::from_micros(500),
            burst_attempts: 20,
        }
    }
}

impl ReceivePolicy {
    /// The longest a receive call can wait for its first packet
    #[must_use]
    pub fn max_idle(&self) -> Duration {
        self.idle_timeout * self.idle_attempts
    }
}

/// Result of [`Connection::receive`]
#[derive(Debug)]
pub enum Received {
    /// A complete packet
    Packet(Packet),
    /// Nothing arrived within the policy's limits; the connection remains open
    Idle,
    /// The peer closed the connection and no complete packets remain
    Closed,
}

/// One end of a packet connection
#[derive(Debug)]
pub struct Connection<S: SendingStream, R: ReceivingStream> {
    stream: SendReceivePair<S, R>,
    reassembler: Reassembler,
    policy: ReceivePolicy,
    cancel: Option<CancellationToken>,
    read_buf: Box<[u8]>,
    peer_closed: bool,
    queue_limits: (usize, usize),
}

/// Outcome of a single timed read
enum ReadOutcome {
    Data,
    Empty,
    Eof,
}

impl<S: SendingStream, R: ReceivingStream> Connection<S, R> {
    /// Constructor
    pub fn new(stream: SendReceivePair<S, R>, policy: ReceivePolicy) -> Self {
        Self {
            stream,
            reassembler: Reassembler::new(),
            policy,
            cancel: None,
            read_buf: vec![0; RECV_BUFFER_SIZE].into_boxed_slice(),
            peer_closed: false,
            queue_limits: (MAX_QUEUED_PACKETS, MAX_QUEUED_BYTES),
        }
    }

    /// Overrides the limits (packets, payload bytes) at which burst draining stops
    #[must_use]
    pub fn with_queue_limits(mut self, packets: usize, bytes: usize) -> Self {
        self.queue_limits = (packets, bytes);
        self
    }

    /// Makes every wait on this connection abort with [`TransportError::Cancelled`] once `token` is cancelled
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The receive policy in force
    #[must_use]
    pub fn policy(&self) -> ReceivePolicy {
        self.policy
    }

    /// Read access to the reassembler, for diagnostics
    #[must_use]
    pub fn reassembler(&self) -> &Reassembler {
        &self.reassembler
    }

    /// True once the peer has closed its sending side
    #[must_use]
    pub fn peer_closed(&self) -> bool {
        self.peer_closed
    }

    /// Sends a complete packet.
    ///
    /// Incomplete packets are refused, as are packets too large for a peer to accept.
    pub async fn send(&mut self, packet: &Packet) -> Result<(), TransportError> {
        if !packet.is_valid() {
            return Err(TransportError::IncompletePacket {
                declared: packet.payload_len(),
                written: packet.written(),
            });
        }
        if packet.payload_len() > MAX_PAYLOAD_SIZE as usize {
            return Err(PacketError::Oversized(
                u32::try_from(packet.payload_len()).unwrap_or(u32::MAX),
            )
            .into());
        }
        trace!("send {packet:?}");
        let bytes = packet.encode();
        let sender = &mut self.stream.send;
        let write = timeout(self.policy.max_idle(), async move {
            sender.write_all(&bytes).await?;
            sender.flush().await
        });
        let outcome = match &self.cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => return Err(TransportError::Cancelled),
                r = write => r,
            },
            None => write.await,
        };
        outcome.map_err(|_| TransportError::SendTimedOut)??;
        Ok(())
    }

    fn queue_full(&self) -> bool {
        let (packets, bytes) = self.queue_limits;
        self.reassembler.queued() >= packets || self.reassembler.queued_bytes() >= bytes
    }

    /// Obtains the next packet, applying the receive policy
    pub async fn receive(&mut self) -> Result<Received, TransportError> {
        if let Some(packet) = self.reassembler.pop() {
            return Ok(Received::Packet(packet));
        }
        if self.peer_closed {
            return Ok(Received::Closed);
        }

        let mut burst = false;
        let mut misses = 0;
        loop {
            let (wait, limit) = if burst {
                (self.policy.burst_timeout, self.policy.burst_attempts)
            } else {
                (self.policy.idle_timeout, self.policy.idle_attempts)
            };
            if misses >= limit || self.queue_full() {
                break;
            }
            match self.read_some(wait).await? {
                ReadOutcome::Eof => {
                    trace!("peer closed connection");
                    self.peer_closed = true;
                    break;
                }
                ReadOutcome::Empty => misses += 1,
                ReadOutcome::Data => {
                    if self.reassembler.queued() > 0 {
                        burst = true;
                        misses = 0;
                    }
                }
            }
        }

        Ok(match self.reassembler.pop() {
            Some(packet) => {
                trace!("recv {packet:?}");
                Received::Packet(packet)
            }
            None if self.peer_closed => Received::Closed,
            None => Received::Idle,
        })
    }

    async fn read_some(&mut self, wait: Duration) -> Result<ReadOutcome, TransportError> {
        let read = timeout(wait, self.stream.recv.read(&mut self.read_buf));
        let outcome = match &self.cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => return Err(TransportError::Cancelled),
                r = read => r,
            },
            None => read.await,
        };
        let Ok(result) = outcome else {
            return Ok(ReadOutcome::Empty);
        };
        match result? {
            0 => Ok(ReadOutcome::Eof),
            n => {
                let completed = self.reassembler.feed(&self.read_buf[..n])?;
                if completed > 0 {
                    trace!("{n} bytes read, {completed} packet(s) completed");
                }
                Ok(ReadOutcome::Data)
            }
        }
    }

    /// Sleeps, returning early with [`TransportError::Cancelled`] if the connection is cancelled
    pub async fn pause(&self, duration: Duration) -> Result<(), TransportError> {
        match &self.cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => Err(TransportError::Cancelled),
                () = sleep(duration) => Ok(()),
            },
            None => {
                sleep(duration).await;
                Ok(())
            }
        }
    }

    /// Shuts down the sending side. Errors are ignored; the peer may already have gone.
    pub async fn close(&mut self) {
        if let Err(e) = self.stream.send.shutdown().await {
            trace!("shutdown: {e}");
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use std::time::Duration;

    use assertables::assert_matches;
    use pretty_assertions::assert_eq;
    use tokio_test::io::{Builder, Mock};
    use tokio_util::sync::CancellationToken;

    use super::{Connection, MAX_QUEUED_PACKETS, ReceivePolicy, Received, TransportError};
    use crate::protocol::common::SendReceivePair;
    use crate::protocol::{Opcode, Packet, message};
    use crate::util::test_protocol::test_plumbing;

    fn fast_policy() -> ReceivePolicy {
        ReceivePolicy {
            idle_timeout: Duration::from_millis(20),
            idle_attempts: 3,
            burst_timeout: Duration::from_millis(5),
            burst_attempts: 2,
        }
    }

    fn reader(mock: Mock) -> Connection<Mock, Mock> {
        reader_with(mock, fast_policy())
    }

    fn reader_with(mock: Mock, policy: ReceivePolicy) -> Connection<Mock, Mock> {
        let pair = SendReceivePair::from((Builder::new().build(), mock));
        Connection::new(pair, policy)
    }

    /// Receives until the connection reports closed, returning how many packets arrived
    async fn count_until_closed(conn: &mut Connection<Mock, Mock>) -> usize {
        let mut count = 0;
        loop {
            match conn.receive().await.unwrap() {
                Received::Packet(_) => count += 1,
                Received::Closed => return count,
                Received::Idle => panic!("unexpected idle"),
            }
        }
    }

    fn wire(packets: &[Packet]) -> Vec<u8> {
        packets.iter().flat_map(|p| p.encode().to_vec()).collect()
    }

    async fn expect_packet(conn: &mut Connection<Mock, Mock>) -> Packet {
        match conn.receive().await.unwrap() {
            Received::Packet(p) => p,
            other => panic!("expected packet, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fragmented_reads() {
        let bytes = wire(&[
            message::handshake_request(1337),
            message::download_request("a/b/c"),
            message::farewell(),
        ]);
        let mut builder = Builder::new();
        for b in bytes.chunks(3) {
            let _ = builder.read(b);
        }
        let mut conn = reader(builder.build());
        let mut p = expect_packet(&mut conn).await;
        assert_eq!(p.opcode(), Some(Opcode::HandshakeRequest));
        assert_eq!(p.read::<u16>(), 1337);
        let mut p = expect_packet(&mut conn).await;
        assert_eq!(p.read_string(), "a/b/c");
        let p = expect_packet(&mut conn).await;
        assert_eq!(p.opcode(), Some(Opcode::Farewell));
        assert_matches!(conn.receive().await.unwrap(), Received::Closed);
        assert!(conn.peer_closed());
    }

    #[tokio::test]
    async fn queued_packets_outlive_close() {
        let bytes = wire(&[message::farewell(), message::farewell()]);
        let mock = Builder::new().read(&bytes).build();
        let mut conn = reader(mock);
        let _ = expect_packet(&mut conn).await;
        let _ = expect_packet(&mut conn).await;
        assert_matches!(conn.receive().await.unwrap(), Received::Closed);
    }

    #[tokio::test]
    async fn idle_then_data() {
        let bytes = wire(&[message::farewell()]);
        let mock = Builder::new()
            .wait(Duration::from_millis(90))
            .read(&bytes)
            .build();
        let mut conn = reader(mock);
        assert_matches!(conn.receive().await.unwrap(), Received::Idle);
        let p = expect_packet(&mut conn).await;
        assert_eq!(p.opcode(), Some(Opcode::Farewell));
    }

    #[tokio::test]
    async fn malformed_header() {
        let mock = Builder::new().read(&[4, 0x7f, 0, 0, 0]).build();
        let mut conn = reader(mock);
        assert_matches!(
            conn.receive().await.unwrap_err(),
            TransportError::Malformed(_)
        );
    }

    #[tokio::test]
    async fn incomplete_packet_is_refused() {
        let (a, _b) = test_plumbing();
        let mut conn = Connection::new(a, fast_policy());
        let mut p = Packet::new(Opcode::DownloadData, 4);
        let _ = p.write(1u16);
        let e = conn.send(&p).await.unwrap_err();
        assert_matches!(
            e,
            TransportError::IncompletePacket {
                declared: 4,
                written: 2
            }
        );
    }

    #[tokio::test]
    async fn send_and_receive() {
        let (a, b) = test_plumbing();
        let mut tx = Connection::new(a, fast_policy());
        let mut rx = Connection::new(b, fast_policy());
        let data: Vec<u8> = (0..=255).cycle().take(10_000).collect();
        // the payload is larger than the pipe, so both ends must run together
        let sender = async {
            tx.send(&message::download_data(&data).unwrap()).await.unwrap();
            tx.send(&message::farewell()).await.unwrap();
            tx.close().await;
        };
        let receiver = async {
            let Received::Packet(p) = rx.receive().await.unwrap() else {
                panic!("expected data");
            };
            assert_eq!(p.payload(), &data[..]);
            let Received::Packet(p) = rx.receive().await.unwrap() else {
                panic!("expected farewell");
            };
            assert_eq!(p.opcode(), Some(Opcode::Farewell));
            assert_matches!(rx.receive().await.unwrap(), Received::Closed);
        };
        let ((), ()) = tokio::join!(sender, receiver);
        assert!(rx.reassembler().is_idle());
    }

    #[tokio::test]
    async fn cancellation() {
        let (a, _b) = test_plumbing();
        let token = CancellationToken::new();
        let mut conn =
            Connection::new(a, ReceivePolicy::default()).with_cancellation(token.clone());
        token.cancel();
        assert_matches!(
            conn.receive().await.unwrap_err(),
            TransportError::Cancelled
        );
        assert_matches!(
            conn.pause(Duration::from_secs(60)).await.unwrap_err(),
            TransportError::Cancelled
        );
    }

    #[tokio::test]
    async fn burst_returns_while_peer_stays_open() {
        let (a, b) = test_plumbing();
        let mut tx = Connection::new(a, fast_policy());
        let policy = ReceivePolicy {
            idle_timeout: Duration::from_secs(2),
            idle_attempts: 5,
            burst_timeout: Duration::from_millis(5),
            burst_attempts: 2,
        };
        let mut rx = Connection::new(b, policy);
        for _ in 0..3 {
            tx.send(&message::farewell()).await.unwrap();
        }
        // tx stays open, so only the burst misses can end the call
        let started = tokio::time::Instant::now();
        let got = rx.receive().await.unwrap();
        assert_matches!(got, Received::Packet(_));
        assert!(started.elapsed() < policy.idle_timeout);
        assert_eq!(rx.reassembler().queued(), 2);
        assert!(!rx.peer_closed());
    }

    #[tokio::test]
    async fn burst_misses_reset_when_data_arrives() {
        let policy = ReceivePolicy {
            burst_timeout: Duration::from_millis(20),
            burst_attempts: 2,
            ..fast_policy()
        };
        // each gap costs one miss; without a reset the second gap would end the call
        let gap = Duration::from_millis(30);
        let p = wire(&[message::farewell()]);
        let mock = Builder::new()
            .read(&p)
            .wait(gap)
            .read(&p)
            .wait(gap)
            .read(&p)
            .build();
        let mut conn = reader_with(mock, policy);
        let _ = expect_packet(&mut conn).await;
        assert_eq!(conn.reassembler().queued(), 2);
        assert_eq!(count_until_closed(&mut conn).await, 2);
    }

    #[tokio::test]
    async fn draining_stops_at_packet_limit() {
        let batch: Vec<u8> = (0..100)
            .flat_map(|_| message::farewell().encode().to_vec())
            .collect();
        let mut builder = Builder::new();
        for _ in 0..4 {
            let _ = builder.read(&batch);
        }
        let mut conn = reader(builder.build());
        let _ = expect_packet(&mut conn).await;
        // the limit is checked between reads, so the third batch is the last one taken
        assert_eq!(conn.reassembler().queued(), 299);
        assert!(conn.reassembler().queued() < MAX_QUEUED_PACKETS + 100);
        assert_eq!(count_until_closed(&mut conn).await, 399);
    }

    #[tokio::test]
    async fn draining_stops_at_byte_limit() {
        let bytes: Vec<u8> = (0..4)
            .flat_map(|_| message::download_data(&[7u8; 4000]).unwrap().encode().to_vec())
            .collect();
        let mock = Builder::new().read(&bytes).build();
        let mut conn = reader(mock).with_queue_limits(MAX_QUEUED_PACKETS, 10_000);
        let p = expect_packet(&mut conn).await;
        assert_eq!(p.payload_len(), 4000);
        assert_eq!(conn.reassembler().queued(), 2);
        assert_eq!(conn.reassembler().queued_bytes(), 8000);
        assert!(conn.reassembler().has_pending());
        assert_eq!(count_until_closed(&mut conn).await, 3);
    }

    #[tokio::test]
    async fn send_to_stalled_peer_times_out() {
        let (a, _b) = test_plumbing();
        let mut conn = Connection::new(a, fast_policy());
        let big = message::download_data(&[0u8; 10_000]).unwrap();
        assert_matches!(
            conn.send(&big).await.unwrap_err(),
            TransportError::SendTimedOut
        );
    }

    #[tokio::test]
    async fn send_to_stalled_peer_is_cancellable() {
        let (a, _b) = test_plumbing();
        let token = CancellationToken::new();
        let mut conn =
            Connection::new(a, ReceivePolicy::default()).with_cancellation(token.clone());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });
        let big = message::download_data(&[0u8; 10_000]).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), conn.send(&big)).await;
        assert_matches!(result, Ok(Err(TransportError::Cancelled)));
        canceller.await.unwrap();
    }

    #[test]
    fn default_policy() {
        let p = ReceivePolicy::default();
        assert_eq!(p.max_idle(), Duration::from_secs(150));
        assert_eq!(p.burst_attempts, 20);
    }
}
