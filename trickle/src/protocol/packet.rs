//! Length-prefixed packets and typed field access
// (c) 2025 Ross Younger

use bytes::{Bytes, BytesMut};
use std::fmt;

use super::Opcode;

/// Size of the packet header on the wire: one opcode byte and a `u32` payload length.
pub const HEADER_SIZE: usize = 5;

/// The largest payload length we are prepared to accept.
///
/// Anything larger is treated as a malformed header. This bounds the allocation a peer can provoke.
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// The longest string that can be carried in a packet; strings are prefixed by a `u8` length.
pub const MAX_STRING_LEN: usize = u8::MAX as usize;

/// Errors arising from decoding a packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    /// Fewer than [`HEADER_SIZE`] bytes were available
    #[error("packet header truncated: {0} bytes available, 5 needed")]
    Truncated(usize),
    /// The declared payload length exceeds [`MAX_PAYLOAD_SIZE`]
    #[error("declared payload length {0} exceeds the limit of {max}", max = MAX_PAYLOAD_SIZE)]
    Oversized(u32),
}

/// A fixed-width integer that can be carried in a packet payload.
///
/// All fields are big-endian on the wire.
pub trait WireField: Sized + Default + Copy {
    /// Encoded width in bytes
    const WIDTH: usize;
    /// Appends the big-endian encoding of this value
    fn put(self, buf: &mut BytesMut);
    /// Decodes a value from exactly [`Self::WIDTH`] bytes
    fn get(bytes: &[u8]) -> Self;
}

macro_rules! wire_field {
    ($($t:ty),+ $(,)?) => {
        $(
            impl WireField for $t {
                const WIDTH: usize = std::mem::size_of::<$t>();
                fn put(self, buf: &mut BytesMut) {
                    buf.extend_from_slice(&self.to_be_bytes());
                }
                fn get(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    <$t>::from_be_bytes(raw)
                }
            }
        )+
    };
}

wire_field!(u8, u16, u32, u64, i8, i16, i32, i64);

/// A single protocol message: an opcode and a payload of declared length.
///
/// A packet is *valid* (complete) once exactly as many payload bytes have been
/// written or appended as its header declares.
/// The payload buffer is sized once at construction and never grows beyond the declared length.
///
/// Field reads proceed through a cursor. A read that would run past the bytes
/// written so far yields a zero value (or an empty string) and does not move the cursor.
/// Writes that would exceed the declared length are ignored.
#[derive(PartialEq, Eq)]
pub struct Packet {
    opcode: u8,
    declared: usize,
    payload: BytesMut,
    read_pos: usize,
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Packet");
        let _ = match self.opcode() {
            Some(op) => d.field("opcode", &op),
            None => d.field("opcode", &self.opcode),
        };
        d.field("declared", &self.declared)
            .field("written", &self.payload.len())
            .finish_non_exhaustive()
    }
}

impl Packet {
    /// Creates an empty packet with room for exactly `payload_len` bytes
    #[must_use]
    pub fn new(opcode: Opcode, payload_len: u32) -> Self {
        Self::with_raw_opcode(opcode.into(), payload_len)
    }

    /// Creates an empty packet with an arbitrary opcode byte.
    ///
    /// This exists so that misbehaving peers can be simulated.
    #[must_use]
    pub fn with_raw_opcode(opcode: u8, payload_len: u32) -> Self {
        let declared = payload_len as usize;
        Self {
            opcode,
            declared,
            payload: BytesMut::with_capacity(declared),
            read_pos: 0,
        }
    }

    /// Decodes a header and whatever payload bytes follow it, up to the declared length.
    ///
    /// The result may be incomplete; feed it further bytes with [`append`](Self::append).
    /// Bytes beyond the declared length are not consumed; the number consumed is
    /// `HEADER_SIZE + packet.written()`.
    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        let Some((header, rest)) = bytes.split_first_chunk::<HEADER_SIZE>() else {
            return Err(PacketError::Truncated(bytes.len()));
        };
        let (opcode, length) = (header[0], u32::get(&header[1..]));
        if length > MAX_PAYLOAD_SIZE {
            return Err(PacketError::Oversized(length));
        }
        let mut packet = Self::with_raw_opcode(opcode, length);
        let _ = packet.append(rest);
        Ok(packet)
    }

    /// Appends raw payload bytes, up to the remaining capacity.
    ///
    /// Returns the number of bytes taken, which may be zero.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let take = bytes.len().min(self.remaining());
        self.payload.extend_from_slice(&bytes[..take]);
        take
    }

    /// The opcode, if it is one we know
    #[must_use]
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_repr(self.opcode)
    }

    /// The opcode byte as received
    #[must_use]
    pub fn raw_opcode(&self) -> u8 {
        self.opcode
    }

    /// Payload length declared in the header
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.declared
    }

    /// Payload bytes written or appended so far
    #[must_use]
    pub fn written(&self) -> usize {
        self.payload.len()
    }

    /// Payload bytes still required to complete the packet
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.declared - self.payload.len()
    }

    /// Size of the packet on the wire, header included
    #[must_use]
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.declared
    }

    /// True when the payload is complete
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.payload.len() == self.declared
    }

    /// The payload bytes written so far
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Encodes the header followed by the payload written so far.
    ///
    /// The header always carries the declared length; callers are expected to
    /// check [`is_valid`](Self::is_valid) before putting the result on the wire.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        self.opcode.put(&mut out);
        #[allow(clippy::cast_possible_truncation)] // bounded by the u32 passed to the constructor
        (self.declared as u32).put(&mut out);
        out.extend_from_slice(&self.payload);
        out.freeze()
    }

    /// Writes a fixed-width field. Has no effect if the field would not fit.
    pub fn write<T: WireField>(&mut self, value: T) -> &mut Self {
        if T::WIDTH <= self.remaining() {
            value.put(&mut self.payload);
        }
        self
    }

    /// Writes a length-prefixed string, truncated to [`MAX_STRING_LEN`] bytes.
    ///
    /// Has no effect if the result would not fit.
    pub fn write_str(&mut self, value: &str) -> &mut Self {
        let bytes = &value.as_bytes()[..value.len().min(MAX_STRING_LEN)];
        if 1 + bytes.len() <= self.remaining() {
            #[allow(clippy::cast_possible_truncation)] // bounded by MAX_STRING_LEN
            (bytes.len() as u8).put(&mut self.payload);
            self.payload.extend_from_slice(bytes);
        }
        self
    }

    /// Writes raw bytes. Has no effect if they would not all fit.
    pub fn write_bytes(&mut self, data: &[u8]) -> &mut Self {
        if data.len() <= self.remaining() {
            self.payload.extend_from_slice(data);
        }
        self
    }

    /// Reads the next fixed-width field, or zero if not enough bytes have been written
    pub fn read<T: WireField>(&mut self) -> T {
        let end = self.read_pos + T::WIDTH;
        if end > self.payload.len() {
            return T::default();
        }
        let value = T::get(&self.payload[self.read_pos..end]);
        self.read_pos = end;
        value
    }

    /// Reads the next length-prefixed string.
    ///
    /// Invalid UTF-8 is replaced rather than rejected.
    /// If the declared string runs past the written bytes, the result is empty.
    pub fn read_string(&mut self) -> String {
        let start = self.read_pos;
        if start >= self.payload.len() {
            return String::new();
        }
        let len = usize::from(self.read::<u8>());
        let end = self.read_pos + len;
        if end > self.payload.len() {
            self.read_pos = start;
            return String::new();
        }
        let value = String::from_utf8_lossy(&self.payload[self.read_pos..end]).into_owned();
        self.read_pos = end;
        value
    }
}
