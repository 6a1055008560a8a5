//! Packet opcodes
// (c) 2025 Ross Younger

/// Identifies the kind of a [`Packet`](super::Packet).
///
/// The numeric values are fixed by the wire protocol. Any change is a breaking protocol change.
///
/// Message names carry the direction in which they travel:
/// requests go from client to server, responses and data from server to client.
/// [`Farewell`](Opcode::Farewell) travels in both directions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum::Display, strum::FromRepr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Opcode {
    /// Client hello. Payload: `u16` magic.
    HandshakeRequest = 0,
    /// Server hello. Payload: `u16` magic.
    HandshakeResponse = 1,
    /// Asks the server for a file. Payload: string (path).
    DownloadRequest = 2,
    /// Answers a download request. Payload: `u8` ok flag, `u64` file size.
    DownloadResponse = 3,
    /// One chunk of file data. Payload: raw bytes.
    DownloadData = 4,
    /// Session closedown, echoed by the server. No payload.
    Farewell = 5,
}

impl From<Opcode> for u8 {
    fn from(value: Opcode) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    /// Converts a raw opcode; unknown values are returned as the error.
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_repr(value).ok_or(value)
    }
}
