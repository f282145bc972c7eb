//! Symmetric encryption for an established secure channel.
//!
//! Sealed body layout:
//!
//! ```text
//! +-----------+------------------+---------+
//! | Nonce     | Ciphertext       | Tag     |
//! | 12 bytes  | N bytes          | 16 bytes|
//! +-----------+------------------+---------+
//! ```
//!
//! Nonces are random per message. The caller supplies associated data (the
//! plaintext frame type) which must match on both sides.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;

use super::keys::{SessionKey, SessionKeys};
use crate::core::{AEAD_NONCE_SIZE, AEAD_TAG_SIZE, CryptoError};

/// Encrypts outbound and decrypts inbound frames with the session keys.
#[derive(Debug)]
pub struct CryptoBox {
    keys: SessionKeys,
}

impl CryptoBox {
    /// Create a crypto box. Both keys are required at once.
    pub fn new(keys: SessionKeys) -> Self {
        Self { keys }
    }

    /// Encrypt with the transmit key.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = cipher(&self.keys.transmit_key)?;

        let mut nonce = [0u8; AEAD_NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut body = Vec::with_capacity(AEAD_NONCE_SIZE + sealed.len());
        body.extend_from_slice(&nonce);
        body.extend_from_slice(&sealed);
        Ok(body)
    }

    /// Decrypt with the receive key.
    pub fn decrypt(&self, body: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if body.len() < AEAD_NONCE_SIZE + AEAD_TAG_SIZE {
            return Err(CryptoError::MalformedCiphertext { len: body.len() });
        }
        let (nonce, sealed) = body.split_at(AEAD_NONCE_SIZE);

        cipher(&self.keys.receive_key)?
            .decrypt(
                Nonce::from_slice(nonce),
                Payload { msg: sealed, aad },
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

fn cipher(key: &SessionKey) -> Result<Aes128Gcm, CryptoError> {
    Aes128Gcm::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::EncryptionFailed)
}
