//! Cryo Protocol - Crypto Layer (CALE)
//!
//! Application-layer encryption on top of the WebSocket:
//!
//! - [`HandshakeEngine`]: ephemeral P-256 key exchange
//! - [`SessionKeys`]: SHA-256 split of the shared secret into two AES-128 keys
//! - [`CryptoBox`]: AES-128-GCM sealing of frames once the channel is secure

mod handshake;
mod keys;
mod session;

pub use handshake::*;
pub use keys::*;
pub use session::*;
