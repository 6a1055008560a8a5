//! Reassembly of packets from an arbitrarily fragmented byte stream
// (c) 2025 Ross Younger

use bytes::{Buf as _, BytesMut};
use std::collections::VecDeque;

use super::{HEADER_SIZE, Packet, PacketError};

/// Running totals of the bytes a [`Reassembler`] has seen
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ByteCounters {
    /// Every byte passed to [`Reassembler::feed`]
    pub fed: u64,
    /// Bytes consumed as packet headers
    pub header: u64,
    /// Bytes consumed as packet payload, including any pending packet
    pub payload: u64,
}

/// Turns a sequence of byte fragments into a sequence of complete packets.
///
/// At most one packet is in progress at any time. Bytes are never duplicated or lost:
/// every byte fed is either part of a header, part of a payload, or held back
/// (fewer than [`HEADER_SIZE`] of them) until the rest of a header arrives.
///
/// The output does not depend on how the input stream was split into fragments.
#[derive(Debug, Default)]
pub struct Reassembler {
    scratch: BytesMut,
    pending: Option<Packet>,
    completed: VecDeque<Packet>,
    completed_bytes: usize,
    counters: ByteCounters,
}

impl Reassembler {
    /// Constructor
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorbs a fragment of the incoming stream.
    ///
    /// Returns the number of packets completed by this fragment.
    /// A malformed header is an error; the reassembler should not be used after that.
    pub fn feed(&mut self, data: &[u8]) -> Result<usize, PacketError> {
        self.counters.fed += data.len() as u64;
        self.scratch.extend_from_slice(data);
        let mut completed = 0;
        loop {
            let consumed = if let Some(packet) = self.pending.as_mut() {
                if self.scratch.is_empty() {
                    break;
                }
                let taken = packet.append(&self.scratch);
                self.counters.payload += taken as u64;
                taken
            } else {
                if self.scratch.len() < HEADER_SIZE {
                    break;
                }
                let packet = Packet::decode(&self.scratch)?;
                let taken = packet.written();
                self.counters.header += HEADER_SIZE as u64;
                self.counters.payload += taken as u64;
                self.pending = Some(packet);
                HEADER_SIZE + taken
            };
            self.scratch.advance(consumed);

            match self.pending.take() {
                Some(packet) if packet.is_valid() => {
                    self.completed_bytes += packet.payload_len();
                    self.completed.push_back(packet);
                    completed += 1;
                }
                still_pending => {
                    // scratch is necessarily empty now
                    self.pending = still_pending;
                    break;
                }
            }
        }
        Ok(completed)
    }

    /// Removes and returns the oldest completed packet
    pub fn pop(&mut self) -> Option<Packet> {
        let packet = self.completed.pop_front()?;
        self.completed_bytes -= packet.payload_len();
        Some(packet)
    }

    /// Number of completed packets awaiting [`pop`](Self::pop)
    #[must_use]
    pub fn queued(&self) -> usize {
        self.completed.len()
    }

    /// Total payload bytes held in completed packets awaiting [`pop`](Self::pop)
    #[must_use]
    pub fn queued_bytes(&self) -> usize {
        self.completed_bytes
    }

    /// True if a packet has been started but not finished
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Bytes held back awaiting the rest of a header
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.scratch.len()
    }

    /// True if no bytes are held anywhere: nothing pending, nothing buffered
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending.is_none() && self.scratch.is_empty()
    }

    /// Byte accounting
    #[must_use]
    pub fn counters(&self) -> ByteCounters {
        self.counters
    }
}
