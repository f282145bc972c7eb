//! Inbound frame dispatch.
//!
//! The router reads the plaintext type tag, decrypts when the channel is
//! secure, decodes, and hands the frame to the matching [`FrameHandler`]
//! method. It enforces two ordering rules:
//!
//! - with CALE on, the first frame on every fresh transport must be
//!   SERVER_HELLO;
//! - with CALE on, application data is never delivered before the channel
//!   is secure.

use thiserror::Error;
use tracing::trace;

use crate::core::CryptoError;
use crate::transport::{Frame, FrameError, FrameType, peek_type, unseal};

/// Receives routed frames.
///
/// Implemented by the session state; the router owns no keys itself.
pub trait FrameHandler {
    /// Whether inbound non-handshake frames are encrypted.
    fn is_secure(&self) -> bool;

    /// Decrypt a sealed body whose plaintext header carried `frame_type`.
    fn decrypt(&mut self, frame_type: FrameType, body: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// PING or PONG.
    fn on_ping_pong(&mut self, frame: Frame);

    /// ACK for one of our data frames.
    fn on_ack(&mut self, frame: Frame);

    /// ERROR report from the server.
    fn on_error(&mut self, frame: Frame);

    /// UTF8_DATA or BINARY_DATA.
    fn on_data(&mut self, frame: Frame);

    /// SERVER_HELLO, only routed when CALE is on.
    fn on_server_hello(&mut self, frame: Frame);

    /// HANDSHAKE_DONE from the server.
    fn on_handshake_done(&mut self, frame: Frame);
}

/// Why a message was not dispatched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// Codec failure. Logged and dropped.
    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),

    /// Sealed body did not decrypt. Treated as a transport error.
    #[error("decryption failed: {0}")]
    Crypto(#[from] CryptoError),

    /// CALE is on and the first frame was not SERVER_HELLO.
    #[error("expected SERVER_HELLO as first frame, got {0}")]
    UnexpectedFirstFrame(String),

    /// The server runs CALE but this client has it disabled.
    #[error("server sent SERVER_HELLO but CALE is disabled")]
    CaleMismatch,

    /// Application data arrived before the channel was secure.
    #[error("{0} received before the channel was secure")]
    InsecureData(FrameType),

    /// A frame type the client never accepts.
    #[error("unsupported inbound frame {0}")]
    Unsupported(FrameType),
}

/// Demultiplexes inbound messages for one session.
#[derive(Debug, Clone)]
pub struct FrameRouter {
    use_cale: bool,
    awaiting_first: bool,
}

impl FrameRouter {
    /// Create a router for a freshly opened transport.
    pub fn new(use_cale: bool) -> Self {
        Self {
            use_cale,
            awaiting_first: use_cale,
        }
    }

    /// Re-arm the first-frame rule for a new transport.
    pub fn reset(&mut self) {
        self.awaiting_first = self.use_cale;
    }

    /// Whether the next message is the first on this transport.
    pub fn awaiting_first(&self) -> bool {
        self.awaiting_first
    }

    /// Route one inbound message. Returns the dispatched frame type.
    pub fn route<H: FrameHandler>(
        &mut self,
        raw: &[u8],
        handler: &mut H,
    ) -> Result<FrameType, RouteError> {
        let header = peek_type(raw);

        if self.awaiting_first {
            match &header {
                Ok(FrameType::ServerHello) => self.awaiting_first = false,
                Ok(other) => return Err(RouteError::UnexpectedFirstFrame(other.to_string())),
                Err(e) => return Err(RouteError::UnexpectedFirstFrame(e.to_string())),
            }
        }
        let header = header?;

        if header == FrameType::ServerHello && !self.use_cale {
            return Err(RouteError::CaleMismatch);
        }

        let secure = handler.is_secure();
        let frame = if secure && !header.is_handshake() {
            let (_, body) = unseal(raw)?;
            let plain = handler.decrypt(header, body)?;
            let frame = Frame::decode(&plain)?;
            if frame.frame_type != header {
                return Err(FrameError::TypeMismatch {
                    header,
                    inner: frame.frame_type,
                }
                .into());
            }
            frame
        } else {
            Frame::decode(raw)?
        };

        if self.use_cale && !secure && frame.frame_type.is_data() {
            return Err(RouteError::InsecureData(frame.frame_type));
        }

        trace!(%frame, secure, "routing");
        match frame.frame_type {
            FrameType::Ping | FrameType::Pong => handler.on_ping_pong(frame),
            FrameType::Ack => handler.on_ack(frame),
            FrameType::Error => handler.on_error(frame),
            FrameType::Utf8Data | FrameType::BinaryData => handler.on_data(frame),
            FrameType::ServerHello => handler.on_server_hello(frame),
            FrameType::HandshakeDone => handler.on_handshake_done(frame),
            FrameType::ClientHello => return Err(RouteError::Unsupported(header)),
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CryptoBox, EphemeralKeyPair, Role};
    use crate::transport::seal;
    use uuid::Uuid;

    #[derive(Default)]
    struct Recorder {
        secure: Option<CryptoBox>,
        decrypt_calls: usize,
        seen: Vec<Frame>,
    }

    impl FrameHandler for Recorder {
        fn is_secure(&self) -> bool {
            self.secure.is_some()
        }

        fn decrypt(&mut self, frame_type: FrameType, body: &[u8]) -> Result<Vec<u8>, CryptoError> {
            self.decrypt_calls += 1;
            match &self.secure {
                Some(crypto) => crypto.decrypt(body, &[frame_type.as_byte()]),
                None => Err(CryptoError::DecryptionFailed),
            }
        }

        fn on_ping_pong(&mut self, frame: Frame) {
            self.seen.push(frame);
        }
        fn on_ack(&mut self, frame: Frame) {
            self.seen.push(frame);
        }
        fn on_error(&mut self, frame: Frame) {
            self.seen.push(frame);
        }
        fn on_data(&mut self, frame: Frame) {
            self.seen.push(frame);
        }
        fn on_server_hello(&mut self, frame: Frame) {
            self.seen.push(frame);
        }
        fn on_handshake_done(&mut self, frame: Frame) {
            self.seen.push(frame);
        }
    }

    fn sid() -> Uuid {
        Uuid::from_bytes([7; 16])
    }

    /// Client recorder plus the server-side box that seals for it.
    fn secure_pair() -> (Recorder, CryptoBox) {
        let client = EphemeralKeyPair::generate();
        let server = EphemeralKeyPair::generate();
        let client_keys = client.diffie_hellman(server.public_key(), Role::Client).unwrap();
        let server_keys = server.diffie_hellman(client.public_key(), Role::Server).unwrap();
        let recorder = Recorder {
            secure: Some(CryptoBox::new(client_keys)),
            ..Default::default()
        };
        (recorder, CryptoBox::new(server_keys))
    }

    fn sealed(server: &CryptoBox, frame: &Frame) -> Vec<u8> {
        let aad = [frame.frame_type.as_byte()];
        seal(frame.frame_type, server.encrypt(&frame.encode(), &aad).unwrap())
    }

    #[test]
    fn test_plaintext_dispatch_without_cale() {
        let mut router = FrameRouter::new(false);
        let mut handler = Recorder::default();

        let ty = router
            .route(&Frame::utf8(sid(), 3, "hi").encode(), &mut handler)
            .unwrap();
        assert_eq!(ty, FrameType::Utf8Data);
        router.route(&Frame::ping(sid(), 4).encode(), &mut handler).unwrap();
        router.route(&Frame::ack(sid(), 0).encode(), &mut handler).unwrap();

        assert_eq!(handler.seen.len(), 3);
        assert_eq!(handler.decrypt_calls, 0);
    }

    #[test]
    fn test_decrypt_never_called_while_insecure() {
        let mut router = FrameRouter::new(true);
        let mut handler = Recorder::default();

        let server = EphemeralKeyPair::generate();
        router
            .route(
                &Frame::server_hello(sid(), 0, server.public_key()).encode(),
                &mut handler,
            )
            .unwrap();
        router
            .route(&Frame::handshake_done(sid(), 1).encode(), &mut handler)
            .unwrap();
        router.route(&Frame::pong(sid(), 2).encode(), &mut handler).unwrap();

        assert_eq!(handler.decrypt_calls, 0);
        assert_eq!(handler.seen.len(), 3);
    }

    #[test]
    fn test_decrypt_always_called_when_secure() {
        let (mut handler, server) = secure_pair();
        let mut router = FrameRouter::new(true);
        let hello = EphemeralKeyPair::generate();
        router
            .route(
                &Frame::server_hello(sid(), 0, hello.public_key()).encode(),
                &mut handler,
            )
            .unwrap();
        handler.seen.clear();

        for frame in [
            Frame::utf8(sid(), 1, "secret"),
            Frame::binary(sid(), 2, vec![0, 1, 2]),
            Frame::ack(sid(), 0),
            Frame::ping(sid(), 3),
            Frame::error(sid(), 4, "oops"),
        ] {
            router.route(&sealed(&server, &frame), &mut handler).unwrap();
        }

        assert_eq!(handler.decrypt_calls, 5);
        assert_eq!(handler.seen[0].text().unwrap(), "secret");
        assert_eq!(handler.seen[1].payload, vec![0, 1, 2]);

        // Handshake frames bypass decryption even when secure
        router
            .route(&Frame::handshake_done(sid(), 9).encode(), &mut handler)
            .unwrap();
        assert_eq!(handler.decrypt_calls, 5);
    }

    #[test]
    fn test_first_frame_must_be_server_hello() {
        let mut router = FrameRouter::new(true);
        let mut handler = Recorder::default();

        let err = router
            .route(&Frame::utf8(sid(), 0, "early").encode(), &mut handler)
            .unwrap_err();
        assert!(matches!(err, RouteError::UnexpectedFirstFrame(_)));
        assert!(handler.seen.is_empty());
    }

    #[test]
    fn test_reset_rearms_first_frame_rule() {
        let mut router = FrameRouter::new(true);
        let mut handler = Recorder::default();
        let server = EphemeralKeyPair::generate();

        router
            .route(
                &Frame::server_hello(sid(), 0, server.public_key()).encode(),
                &mut handler,
            )
            .unwrap();
        assert!(!router.awaiting_first());

        router.reset();
        assert!(router.awaiting_first());
        assert!(router.route(&Frame::ping(sid(), 1).encode(), &mut handler).is_err());
    }

    #[test]
    fn test_server_hello_without_cale_is_mismatch() {
        let mut router = FrameRouter::new(false);
        let mut handler = Recorder::default();
        let server = EphemeralKeyPair::generate();

        let err = router
            .route(
                &Frame::server_hello(sid(), 0, server.public_key()).encode(),
                &mut handler,
            )
            .unwrap_err();
        assert_eq!(err, RouteError::CaleMismatch);
        assert!(handler.seen.is_empty());
    }

    #[test]
    fn test_plaintext_data_before_secure_dropped() {
        let mut router = FrameRouter::new(true);
        let mut handler = Recorder::default();
        let server = EphemeralKeyPair::generate();
        router
            .route(
                &Frame::server_hello(sid(), 0, server.public_key()).encode(),
                &mut handler,
            )
            .unwrap();

        let err = router
            .route(&Frame::utf8(sid(), 1, "leak").encode(), &mut handler)
            .unwrap_err();
        assert_eq!(err, RouteError::InsecureData(FrameType::Utf8Data));
        assert_eq!(handler.seen.len(), 1);
    }

    #[test]
    fn test_header_type_must_match_sealed_type() {
        let (mut handler, server) = secure_pair();
        let mut router = FrameRouter::new(false);

        // Sealed UTF8 frame relabelled as BINARY with matching AAD
        let frame = Frame::utf8(sid(), 1, "hi");
        let body = server
            .encrypt(&frame.encode(), &[FrameType::BinaryData.as_byte()])
            .unwrap();
        let raw = seal(FrameType::BinaryData, body);

        let err = router.route(&raw, &mut handler).unwrap_err();
        assert!(matches!(
            err,
            RouteError::Frame(FrameError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_tampered_ciphertext_is_crypto_error() {
        let (mut handler, server) = secure_pair();
        let mut router = FrameRouter::new(false);

        let mut raw = sealed(&server, &Frame::utf8(sid(), 1, "hi"));
        let last = raw.len() - 1;
        raw[last] ^= 0x01;

        assert!(matches!(
            router.route(&raw, &mut handler),
            Err(RouteError::Crypto(_))
        ));
    }

    #[test]
    fn test_garbage_is_frame_error() {
        let mut router = FrameRouter::new(false);
        let mut handler = Recorder::default();
        assert!(matches!(
            router.route(&[0xee, 1, 2], &mut handler),
            Err(RouteError::Frame(FrameError::InvalidType(0xee)))
        ));
    }
}
