//! P-256 ephemeral keys and session key derivation.
//!
//! Both sides hash the ECDH shared secret with SHA-256 and split the digest
//! into two directional AES-128 keys:
//!
//! ```text
//! digest[0..16]  = server → client key
//! digest[16..32] = client → server key
//! ```

use p256::ecdh::diffie_hellman;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::core::{CryptoError, HASH_SIZE, PUBLIC_KEY_SIZE, SESSION_KEY_SIZE};

/// Which end of the channel derives the keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The connecting side.
    Client,
    /// The accepting side.
    Server,
}

/// A 16-byte AES-128 key, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_SIZE]);

impl SessionKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; SESSION_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// The two directional keys of a secure channel.
#[derive(Debug, Clone)]
pub struct SessionKeys {
    /// Encrypts outbound frames.
    pub transmit_key: SessionKey,
    /// Decrypts inbound frames.
    pub receive_key: SessionKey,
}

impl SessionKeys {
    /// Derive both keys from an ECDH shared secret.
    pub fn derive(shared_secret: &[u8], role: Role) -> Self {
        let mut digest = Zeroizing::new([0u8; HASH_SIZE]);
        digest.copy_from_slice(&Sha256::digest(shared_secret));

        let mut low = [0u8; SESSION_KEY_SIZE];
        let mut high = [0u8; SESSION_KEY_SIZE];
        low.copy_from_slice(&digest[..SESSION_KEY_SIZE]);
        high.copy_from_slice(&digest[SESSION_KEY_SIZE..]);
        let (low, high) = (SessionKey(low), SessionKey(high));

        match role {
            Role::Client => Self {
                transmit_key: high,
                receive_key: low,
            },
            Role::Server => Self {
                transmit_key: low,
                receive_key: high,
            },
        }
    }
}

/// An ephemeral P-256 key pair, used for exactly one handshake.
pub struct EphemeralKeyPair {
    secret: SecretKey,
    public: [u8; PUBLIC_KEY_SIZE],
}

impl EphemeralKeyPair {
    /// Generate a fresh key pair from the OS RNG.
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let mut public = [0u8; PUBLIC_KEY_SIZE];
        public.copy_from_slice(secret.public_key().to_encoded_point(false).as_bytes());
        Self { secret, public }
    }

    /// SEC1 uncompressed public key (`0x04 || x || y`).
    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.public
    }

    /// Compute session keys against the peer's SEC1 uncompressed public key.
    pub fn diffie_hellman(&self, peer_public: &[u8], role: Role) -> Result<SessionKeys, CryptoError> {
        if peer_public.len() != PUBLIC_KEY_SIZE {
            return Err(CryptoError::InvalidPublicKey(format!(
                "expected {PUBLIC_KEY_SIZE} bytes, got {}",
                peer_public.len()
            )));
        }
        if peer_public[0] != 0x04 {
            return Err(CryptoError::InvalidPublicKey(
                "not an uncompressed point".into(),
            ));
        }
        let peer = PublicKey::from_sec1_bytes(peer_public)
            .map_err(|_| CryptoError::InvalidPublicKey("point not on P-256".into()))?;

        let shared = diffie_hellman(self.secret.to_nonzero_scalar(), peer.as_affine());
        Ok(SessionKeys::derive(shared.raw_secret_bytes().as_slice(), role))
    }
}

impl std::fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public", &hex_prefix(&self.public))
            .finish_non_exhaustive()
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes.iter().take(4).map(|b| format!("{b:02x}")).collect()
}
