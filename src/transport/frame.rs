//! Frame encoding and decoding for the Cryo wire format.
//!
//! Every WebSocket message carries exactly one frame:
//!
//! ```text
//! +--------+----------------------+--------------+-------------+
//! | Type   | Session ID           | Ack          | Payload     |
//! | 1 byte | 16 bytes (UUID)      | 4 bytes BE32 | N bytes     |
//! +--------+----------------------+--------------+-------------+
//! ```
//!
//! Once the channel is secure the frame is sealed as
//! `type || ciphertext(frame)`, so the type tag stays readable and
//! [`peek_type`] works on both forms.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::core::{
    ACK_SIZE, FRAME_HEADER_SIZE, FRAME_TYPE_ACK, FRAME_TYPE_BINARY_DATA, FRAME_TYPE_CLIENT_HELLO,
    FRAME_TYPE_ERROR, FRAME_TYPE_HANDSHAKE_DONE, FRAME_TYPE_PING, FRAME_TYPE_PONG,
    FRAME_TYPE_SERVER_HELLO, FRAME_TYPE_UTF8_DATA, SESSION_ID_SIZE,
};

/// Payload carried by PING frames.
pub const PING_PAYLOAD: &str = "ping";

/// Payload carried by PONG frames.
pub const PONG_PAYLOAD: &str = "pong";

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// UTF-8 text from the application.
    Utf8Data = FRAME_TYPE_UTF8_DATA,
    /// Opaque bytes from the application.
    BinaryData = FRAME_TYPE_BINARY_DATA,
    /// Acknowledges a data frame by its ack id.
    Ack = FRAME_TYPE_ACK,
    /// Error text reported by the peer.
    Error = FRAME_TYPE_ERROR,
    /// Keepalive request.
    Ping = FRAME_TYPE_PING,
    /// Keepalive response.
    Pong = FRAME_TYPE_PONG,
    /// Server's ephemeral public key.
    ServerHello = FRAME_TYPE_SERVER_HELLO,
    /// Client's ephemeral public key.
    ClientHello = FRAME_TYPE_CLIENT_HELLO,
    /// Handshake completion.
    HandshakeDone = FRAME_TYPE_HANDSHAKE_DONE,
}

impl FrameType {
    /// Parse frame type from a byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            FRAME_TYPE_UTF8_DATA => Some(Self::Utf8Data),
            FRAME_TYPE_BINARY_DATA => Some(Self::BinaryData),
            FRAME_TYPE_ACK => Some(Self::Ack),
            FRAME_TYPE_ERROR => Some(Self::Error),
            FRAME_TYPE_PING => Some(Self::Ping),
            FRAME_TYPE_PONG => Some(Self::Pong),
            FRAME_TYPE_SERVER_HELLO => Some(Self::ServerHello),
            FRAME_TYPE_CLIENT_HELLO => Some(Self::ClientHello),
            FRAME_TYPE_HANDSHAKE_DONE => Some(Self::HandshakeDone),
            _ => None,
        }
    }

    /// Convert frame type to its byte representation.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Protocol name of the frame type, as used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Self::Utf8Data => "UTF8_DATA",
            Self::BinaryData => "BINARY_DATA",
            Self::Ack => "ACK",
            Self::Error => "ERROR",
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::ServerHello => "SERVER_HELLO",
            Self::ClientHello => "CLIENT_HELLO",
            Self::HandshakeDone => "HANDSHAKE_DONE",
        }
    }

    /// Handshake frames always travel in plaintext.
    pub fn is_handshake(self) -> bool {
        matches!(
            self,
            Self::ServerHello | Self::ClientHello | Self::HandshakeDone
        )
    }

    /// Data frames are tracked until the peer acknowledges them.
    pub fn is_data(self) -> bool {
        matches!(self, Self::Utf8Data | Self::BinaryData)
    }

    /// Whether the payload must be valid UTF-8.
    fn has_text_payload(self) -> bool {
        matches!(
            self,
            Self::Utf8Data | Self::Error | Self::Ping | Self::Pong
        )
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors that can occur during frame parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Frame is too short.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum expected size.
        expected: usize,
        /// Actual size received.
        actual: usize,
    },

    /// Invalid frame type.
    #[error("invalid frame type: 0x{0:02x}")]
    InvalidType(u8),

    /// Text payload is not valid UTF-8.
    #[error("{0} payload is not valid UTF-8")]
    InvalidUtf8(FrameType),

    /// Decrypted frame disagrees with its plaintext type header.
    #[error("type header says {header}, sealed frame is {inner}")]
    TypeMismatch {
        /// Type read from the plaintext header.
        header: FrameType,
        /// Type read from the decrypted frame.
        inner: FrameType,
    },
}

/// A decoded Cryo frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type.
    pub frame_type: FrameType,
    /// Session the frame belongs to.
    pub session_id: Uuid,
    /// Ack id (own id for data/ping frames, acknowledged id for ACK frames).
    pub ack: u32,
    /// Type-dependent payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame of any type.
    pub fn new(frame_type: FrameType, session_id: Uuid, ack: u32, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            session_id,
            ack,
            payload,
        }
    }

    /// UTF-8 data frame.
    pub fn utf8(session_id: Uuid, ack: u32, text: &str) -> Self {
        Self::new(FrameType::Utf8Data, session_id, ack, text.as_bytes().to_vec())
    }

    /// Binary data frame.
    pub fn binary(session_id: Uuid, ack: u32, data: Vec<u8>) -> Self {
        Self::new(FrameType::BinaryData, session_id, ack, data)
    }

    /// Acknowledgment of `ack`.
    pub fn ack(session_id: Uuid, ack: u32) -> Self {
        Self::new(FrameType::Ack, session_id, ack, Vec::new())
    }

    /// Error report.
    pub fn error(session_id: Uuid, ack: u32, message: &str) -> Self {
        Self::new(FrameType::Error, session_id, ack, message.as_bytes().to_vec())
    }

    /// Keepalive ping.
    pub fn ping(session_id: Uuid, ack: u32) -> Self {
        Self::new(
            FrameType::Ping,
            session_id,
            ack,
            PING_PAYLOAD.as_bytes().to_vec(),
        )
    }

    /// Keepalive pong.
    pub fn pong(session_id: Uuid, ack: u32) -> Self {
        Self::new(
            FrameType::Pong,
            session_id,
            ack,
            PONG_PAYLOAD.as_bytes().to_vec(),
        )
    }

    /// Server hello carrying the server's public key.
    pub fn server_hello(session_id: Uuid, ack: u32, public_key: &[u8]) -> Self {
        Self::new(FrameType::ServerHello, session_id, ack, public_key.to_vec())
    }

    /// Client hello carrying the client's public key.
    pub fn client_hello(session_id: Uuid, ack: u32, public_key: &[u8]) -> Self {
        Self::new(FrameType::ClientHello, session_id, ack, public_key.to_vec())
    }

    /// Handshake completion.
    pub fn handshake_done(session_id: Uuid, ack: u32) -> Self {
        Self::new(FrameType::HandshakeDone, session_id, ack, Vec::new())
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        buf.push(self.frame_type.as_byte());
        buf.extend_from_slice(self.session_id.as_bytes());
        buf.extend_from_slice(&self.ack.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a plaintext frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < FRAME_HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: FRAME_HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let frame_type = peek_type(bytes)?;

        let mut sid = [0u8; SESSION_ID_SIZE];
        sid.copy_from_slice(&bytes[1..1 + SESSION_ID_SIZE]);
        let ack = peek_ack(bytes)?;

        let payload = bytes[FRAME_HEADER_SIZE..].to_vec();
        if frame_type.has_text_payload() && std::str::from_utf8(&payload).is_err() {
            return Err(FrameError::InvalidUtf8(frame_type));
        }

        Ok(Self {
            frame_type,
            session_id: Uuid::from_bytes(sid),
            ack,
            payload,
        })
    }

    /// Payload as text.
    ///
    /// Always succeeds for frames produced by [`Frame::decode`] whose type
    /// carries text.
    pub fn text(&self) -> Result<&str, FrameError> {
        std::str::from_utf8(&self.payload).map_err(|_| FrameError::InvalidUtf8(self.frame_type))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{} ({} bytes)",
            self.frame_type,
            self.ack,
            self.payload.len()
        )
    }
}

/// Read the frame type without decoding the rest.
///
/// Works on plaintext and sealed frames alike.
pub fn peek_type(bytes: &[u8]) -> Result<FrameType, FrameError> {
    let first = *bytes.first().ok_or(FrameError::TooShort {
        expected: 1,
        actual: 0,
    })?;
    FrameType::from_byte(first).ok_or(FrameError::InvalidType(first))
}

/// Read the ack id of a plaintext frame without decoding the payload.
pub fn peek_ack(bytes: &[u8]) -> Result<u32, FrameError> {
    if bytes.len() < FRAME_HEADER_SIZE {
        return Err(FrameError::TooShort {
            expected: FRAME_HEADER_SIZE,
            actual: bytes.len(),
        });
    }
    let start = 1 + SESSION_ID_SIZE;
    let mut ack = [0u8; ACK_SIZE];
    ack.copy_from_slice(&bytes[start..start + ACK_SIZE]);
    Ok(u32::from_be_bytes(ack))
}

/// Prefix a sealed body with its plaintext type tag.
pub fn seal(frame_type: FrameType, ciphertext: Vec<u8>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + ciphertext.len());
    buf.push(frame_type.as_byte());
    buf.extend_from_slice(&ciphertext);
    buf
}

/// Split a sealed message into its type tag and ciphertext body.
pub fn unseal(bytes: &[u8]) -> Result<(FrameType, &[u8]), FrameError> {
    let frame_type = peek_type(bytes)?;
    Ok((frame_type, &bytes[1..]))
}
