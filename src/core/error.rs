//! Error types shared across the Cryo layers.

use thiserror::Error;

/// Errors in the crypto layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Peer public key could not be parsed as a P-256 point.
    #[error("invalid peer public key: {0}")]
    InvalidPublicKey(String),

    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    /// Ciphertext is too short to hold a nonce and tag.
    #[error("malformed ciphertext: {len} bytes")]
    MalformedCiphertext {
        /// Length of the rejected input.
        len: usize,
    },

    /// AEAD decryption failed (wrong key, invalid tag, or corrupted).
    #[error("AEAD decryption failed (wrong key, invalid tag or corrupted)")]
    DecryptionFailed,
}

/// Errors raised by the handshake engine.
///
/// Every variant is fatal for the session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// A handshake frame arrived in a state that does not accept it.
    #[error("{frame} received while in state {state}")]
    UnexpectedFrame {
        /// Name of the offending frame type.
        frame: &'static str,
        /// Name of the state the engine was in.
        state: &'static str,
    },

    /// Key exchange failed.
    #[error("key exchange failed: {0}")]
    KeyExchange(#[from] CryptoError),

    /// The session ran out of ack ids.
    #[error("ack id space exhausted")]
    AckExhausted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_error_names_state() {
        let err = HandshakeError::UnexpectedFrame {
            frame: "HANDSHAKE_DONE",
            state: "WAIT_SERVER_HELLO",
        };
        assert_eq!(
            err.to_string(),
            "HANDSHAKE_DONE received while in state WAIT_SERVER_HELLO"
        );
    }

    #[test]
    fn test_crypto_error_converts() {
        let err: HandshakeError = CryptoError::InvalidPublicKey("short".into()).into();
        assert!(matches!(err, HandshakeError::KeyExchange(_)));
    }
}
