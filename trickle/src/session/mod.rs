// (c) 2025 Ross Younger

//! Session protocol state machine
//!
//! A session is one exchange between a client and a server over one connection:
//! handshake, a single download, and farewell. Both roles share the same [`Session`]
//! core, which owns the [`Connection`] and enforces the legal state transitions.
//!
//! ```text
//!  Init ──> HandshakeSent (client) ──┐
//!   │                                ├──> Transfer ──> Farewell ──> Closed
//!   └────> HandshakeReceived (server)┘
//! ```
//!
//! Any state may move to `Closed` when the session is aborted.
//! A missing packet or an unexpected opcode aborts the session; there is no retry.

use thiserror::Error;
use tracing::trace;

use crate::protocol::common::{ReceivingStream, SendingStream};
use crate::protocol::{Opcode, Packet};
use crate::transfer::TransferError;
use crate::transport::{Connection, Received, TransportError};

mod client;
pub use client::{ClientSession, DownloadOutcome};
mod server;
pub use server::{ServeOutcome, ServerSession};

/// Which end of the connection a session represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    /// Initiates the handshake and requests a file
    Client,
    /// Answers the handshake and serves the file
    Server,
}

/// Protocol state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SessionState {
    /// Nothing exchanged yet
    Init,
    /// Client has sent its handshake
    HandshakeSent,
    /// Server has received a handshake
    HandshakeReceived,
    /// Download request in progress
    Transfer,
    /// Closedown in progress
    Farewell,
    /// Finished; nothing more may be sent
    Closed,
}

impl SessionState {
    /// Whether `self -> next` is a legal transition for the given role
    #[must_use]
    pub fn can_advance(self, next: Self, role: Role) -> bool {
        use SessionState as S;
        match (self, next) {
            (S::Closed, _) => false,
            (_, S::Closed)
            | (S::HandshakeSent | S::HandshakeReceived, S::Transfer)
            | (S::Transfer, S::Farewell) => true,
            (S::Init, S::HandshakeSent) => role == Role::Client,
            (S::Init, S::HandshakeReceived) => role == Role::Server,
            _ => false,
        }
    }
}

/// Errors which abort a session
#[derive(Debug, Error)]
pub enum SessionError {
    /// The connection failed
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Sending the payload failed
    #[error(transparent)]
    Transfer(#[from] TransferError),
    /// The peer closed the connection early
    #[error("peer closed the connection while {0} was expected")]
    PeerClosed(Opcode),
    /// The peer went quiet
    #[error("timed out waiting for {0}")]
    TimedOut(Opcode),
    /// The peer sent something out of sequence
    #[error("protocol violation: expected {expected}, received opcode {received}")]
    UnexpectedOpcode {
        /// What we were waiting for
        expected: Opcode,
        /// The raw opcode that arrived
        received: u8,
    },
    /// The peer stopped sending before the announced size was reached
    #[error("short transfer: received {received} of {expected} bytes")]
    ShortTransfer {
        /// Announced size
        expected: u64,
        /// Bytes actually received
        received: u64,
    },
    /// The peer sent more data than it announced
    #[error("peer sent {received} bytes, more than the {expected} announced")]
    Overrun {
        /// Announced size
        expected: u64,
        /// Bytes actually received
        received: u64,
    },
    /// Internal sequencing error
    #[error("illegal session transition {from} -> {to}")]
    IllegalTransition {
        /// State before
        from: SessionState,
        /// Attempted state
        to: SessionState,
    },
    /// Local file I/O failed
    #[error("file I/O failed")]
    File(#[from] std::io::Error),
}

/// State and connection shared by both roles
#[derive(Debug)]
pub struct Session<S: SendingStream, R: ReceivingStream> {
    connection: Connection<S, R>,
    role: Role,
    state: SessionState,
}

impl<S: SendingStream, R: ReceivingStream> Session<S, R> {
    /// Constructor
    pub fn new(connection: Connection<S, R>, role: Role) -> Self {
        Self {
            connection,
            role,
            state: SessionState::Init,
        }
    }

    /// Accessor
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn advance(&mut self, next: SessionState) -> Result<(), SessionError> {
        if !self.state.can_advance(next, self.role) {
            return Err(SessionError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        trace!("{} -> {next}", self.state);
        self.state = next;
        Ok(())
    }

    pub(crate) async fn send(&mut self, packet: &Packet) -> Result<(), SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::IllegalTransition {
                from: SessionState::Closed,
                to: SessionState::Closed,
            });
        }
        Ok(self.connection.send(packet).await?)
    }

    /// Waits for the next packet, which must carry the `expected` opcode
    pub(crate) async fn receive_expected(
        &mut self,
        expected: Opcode,
    ) -> Result<Packet, SessionError> {
        match self.connection.receive().await? {
            Received::Packet(p) if p.raw_opcode() == u8::from(expected) => Ok(p),
            Received::Packet(p) => Err(SessionError::UnexpectedOpcode {
                expected,
                received: p.raw_opcode(),
            }),
            Received::Idle => Err(SessionError::TimedOut(expected)),
            Received::Closed => Err(SessionError::PeerClosed(expected)),
        }
    }

    pub(crate) fn connection_mut(&mut self) -> &mut Connection<S, R> {
        &mut self.connection
    }

    /// Moves to `Closed` and shuts down our sending side
    pub(crate) async fn close(&mut self) {
        if self.state != SessionState::Closed {
            trace!("{} -> {}", self.state, SessionState::Closed);
            self.state = SessionState::Closed;
        }
        self.connection.close().await;
    }
}
