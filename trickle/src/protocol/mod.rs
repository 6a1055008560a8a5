// (c) 2025 Ross Younger

//! The trickle wire protocol
//!
//! # Framing
//!
//! Every message is a packet with a fixed five byte header:
//!
//! | offset | size | field |
//! |--------|------|-------|
//! | 0 | 1 | opcode ([`Opcode`]) |
//! | 1 | 4 | payload length, big-endian `u32` |
//! | 5 | length | payload |
//!
//! Payload fields are fixed-width big-endian integers, or strings carried as a
//! `u8` length followed by that many bytes. There is no padding and no checksum;
//! TCP provides integrity.
//!
//! Declared payload lengths above [`MAX_PAYLOAD_SIZE`] are rejected as malformed.
//!
//! # Session flow
//!
//! ```text
//!  client                          server
//!    | -- HANDSHAKE_REQUEST(1337) --> |
//!    | <-- HANDSHAKE_RESPONSE(42) --- |
//!    | -- DOWNLOAD_REQUEST(path) ---> |
//!    | <-- DOWNLOAD_RESPONSE(ok,n) -- |
//!    | <-- DOWNLOAD_DATA ...  ------- |  (only if ok; n bytes in total)
//!    | -- FAREWELL -----------------> |
//!    | <-- FAREWELL ----------------- |
//! ```
//!
//! The magic numbers are exchanged but not checked by either side.
//! A response with `ok == 0` means the file could not be opened; it is not a protocol error.

pub mod common;
pub mod message;

mod opcode;
pub use opcode::Opcode;

mod packet;
pub use packet::{
    HEADER_SIZE, MAX_PAYLOAD_SIZE, MAX_STRING_LEN, Packet, PacketError, WireField,
};

mod reassembly;
pub use reassembly::{ByteCounters, Reassembler};
