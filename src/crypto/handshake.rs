//! Client side of the CALE key exchange.
//!
//! ```text
//! Client                                 Server
//!   |  <------------ SERVER_HELLO (pk_s)     |
//!   |  CLIENT_HELLO (pk_c) ------------>     |
//!   |  <------------ HANDSHAKE_DONE          |
//!   |  HANDSHAKE_DONE (echo) ---------->     |
//!   |               [secure]                 |
//! ```
//!
//! States only move forward. A frame that arrives in the wrong state is an
//! error and leaves the engine untouched.

use std::fmt;

use uuid::Uuid;

use super::keys::{EphemeralKeyPair, Role, SessionKeys};
use crate::core::{HandshakeError, PUBLIC_KEY_SIZE};
use crate::sync::AckCounter;
use crate::transport::{Frame, FrameType};

/// Observable handshake state.
///
/// The initial state is transient: a new engine has already generated its
/// key pair and waits for the server hello.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HandshakeState {
    /// Waiting for the server's public key.
    WaitServerHello,
    /// Client hello sent, waiting for the server to finish.
    WaitServerDone,
    /// Keys handed out; the channel is encrypted.
    Secure,
}

impl HandshakeState {
    /// Name used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Self::WaitServerHello => "WAIT_SERVER_HELLO",
            Self::WaitServerDone => "WAIT_SERVER_DONE",
            Self::Secure => "SECURE",
        }
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

enum Stage {
    WaitServerHello(EphemeralKeyPair),
    WaitServerDone(SessionKeys),
    Secure,
}

/// Drives one key exchange for one transport.
pub struct HandshakeEngine {
    session_id: Uuid,
    stage: Stage,
}

impl fmt::Debug for HandshakeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeEngine")
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .finish()
    }
}

impl HandshakeEngine {
    /// Generate a key pair and wait for the server hello.
    pub fn new(session_id: Uuid) -> Self {
        Self::with_key_pair(session_id, EphemeralKeyPair::generate())
    }

    /// Start from an existing key pair.
    pub fn with_key_pair(session_id: Uuid, key_pair: EphemeralKeyPair) -> Self {
        Self {
            session_id,
            stage: Stage::WaitServerHello(key_pair),
        }
    }

    /// Current state.
    pub fn state(&self) -> HandshakeState {
        match self.stage {
            Stage::WaitServerHello(_) => HandshakeState::WaitServerHello,
            Stage::WaitServerDone(_) => HandshakeState::WaitServerDone,
            Stage::Secure => HandshakeState::Secure,
        }
    }

    /// Local public key while it is still needed.
    pub fn public_key(&self) -> Option<&[u8; PUBLIC_KEY_SIZE]> {
        match &self.stage {
            Stage::WaitServerHello(key_pair) => Some(key_pair.public_key()),
            _ => None,
        }
    }

    fn unexpected(&self, frame: FrameType) -> HandshakeError {
        HandshakeError::UnexpectedFrame {
            frame: frame.name(),
            state: self.state().name(),
        }
    }

    /// Handle SERVER_HELLO: derive keys and answer with CLIENT_HELLO.
    pub fn on_server_hello(
        &mut self,
        frame: &Frame,
        acks: &mut AckCounter,
    ) -> Result<Frame, HandshakeError> {
        let Stage::WaitServerHello(key_pair) = &self.stage else {
            return Err(self.unexpected(FrameType::ServerHello));
        };

        let keys = key_pair.diffie_hellman(&frame.payload, Role::Client)?;
        let ack = acks.next_id().ok_or(HandshakeError::AckExhausted)?;
        let reply = Frame::client_hello(self.session_id, ack, key_pair.public_key());

        self.stage = Stage::WaitServerDone(keys);
        Ok(reply)
    }

    /// Handle the server's HANDSHAKE_DONE: echo it and release the keys.
    pub fn on_server_handshake_done(
        &mut self,
        frame: &Frame,
    ) -> Result<(Frame, SessionKeys), HandshakeError> {
        match std::mem::replace(&mut self.stage, Stage::Secure) {
            Stage::WaitServerDone(keys) => {
                let reply = Frame::handshake_done(self.session_id, frame.ack);
                Ok((reply, keys))
            }
            other => {
                self.stage = other;
                Err(self.unexpected(FrameType::HandshakeDone))
            }
        }
    }
}
