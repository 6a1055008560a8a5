// (c) 2025 Ross Younger

//! Constructors for each protocol message
//!
//! Each function sizes the packet exactly for its contents, so the result is always
//! [valid](super::Packet::is_valid).

use super::{MAX_PAYLOAD_SIZE, MAX_STRING_LEN, Opcode, Packet, PacketError};

/// Magic value sent by the client in its handshake
pub const CLIENT_MAGIC: u16 = 1337;
/// Magic value sent by the server in its handshake
pub const SERVER_MAGIC: u16 = 42;

/// `HANDSHAKE_REQUEST`
#[must_use]
pub fn handshake_request(magic: u16) -> Packet {
    let mut p = Packet::new(Opcode::HandshakeRequest, 2);
    let _ = p.write(magic);
    p
}

/// `HANDSHAKE_RESPONSE`
#[must_use]
pub fn handshake_response(magic: u16) -> Packet {
    let mut p = Packet::new(Opcode::HandshakeResponse, 2);
    let _ = p.write(magic);
    p
}

/// `DOWNLOAD_REQUEST`. Paths longer than [`MAX_STRING_LEN`] bytes are truncated.
#[must_use]
pub fn download_request(path: &str) -> Packet {
    #[allow(clippy::cast_possible_truncation)] // bounded by MAX_STRING_LEN
    let len = (1 + path.len().min(MAX_STRING_LEN)) as u32;
    let mut p = Packet::new(Opcode::DownloadRequest, len);
    let _ = p.write_str(path);
    p
}

/// `DOWNLOAD_RESPONSE`. The size is only meaningful when `available` is true.
#[must_use]
pub fn download_response(available: bool, size: u64) -> Packet {
    let mut p = Packet::new(Opcode::DownloadResponse, 1 + 8);
    let _ = p.write(u8::from(available)).write(size);
    p
}

/// `DOWNLOAD_DATA`, carrying a copy of `chunk`
///
/// Chunks longer than [`MAX_PAYLOAD_SIZE`] cannot be sent in one packet.
pub fn download_data(chunk: &[u8]) -> Result<Packet, PacketError> {
    let len = u32::try_from(chunk.len()).unwrap_or(u32::MAX);
    if len > MAX_PAYLOAD_SIZE {
        return Err(PacketError::Oversized(len));
    }
    let mut p = Packet::new(Opcode::DownloadData, len);
    let _ = p.write_bytes(chunk);
    Ok(p)
}

/// `FAREWELL`
#[must_use]
pub fn farewell() -> Packet {
    Packet::new(Opcode::Farewell, 0)
}
