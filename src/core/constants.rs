//! Protocol constants for the Cryo session layer.
//!
//! Wire values here are shared with the server and MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// CRYPTOGRAPHIC CONSTANTS
// =============================================================================

/// Size of each directional symmetric key (AES-128).
pub const SESSION_KEY_SIZE: usize = 16;

/// AES-GCM nonce size.
pub const AEAD_NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// SEC1 uncompressed P-256 public key size (0x04 || x || y).
pub const PUBLIC_KEY_SIZE: usize = 65;

/// SHA-256 digest size; split into the two session keys.
pub const HASH_SIZE: usize = 32;

// =============================================================================
// FRAME LAYOUT
// =============================================================================

/// Session ID size (UUID, 16 bytes).
pub const SESSION_ID_SIZE: usize = 16;

/// Ack number size (u32, big-endian).
pub const ACK_SIZE: usize = 4;

/// Frame header size (type + session_id + ack).
pub const FRAME_HEADER_SIZE: usize = 1 + SESSION_ID_SIZE + ACK_SIZE;

// =============================================================================
// FRAME TYPES
// =============================================================================

/// UTF-8 text data frame.
pub const FRAME_TYPE_UTF8_DATA: u8 = 0x01;

/// Opaque binary data frame.
pub const FRAME_TYPE_BINARY_DATA: u8 = 0x02;

/// Acknowledgment of a data frame.
pub const FRAME_TYPE_ACK: u8 = 0x03;

/// Error report from the peer.
pub const FRAME_TYPE_ERROR: u8 = 0x04;

/// Keepalive ping.
pub const FRAME_TYPE_PING: u8 = 0x05;

/// Keepalive pong.
pub const FRAME_TYPE_PONG: u8 = 0x06;

/// Server's ephemeral public key (first frame when CALE is on).
pub const FRAME_TYPE_SERVER_HELLO: u8 = 0x10;

/// Client's ephemeral public key.
pub const FRAME_TYPE_CLIENT_HELLO: u8 = 0x11;

/// Handshake completion marker, sent by both sides.
pub const FRAME_TYPE_HANDSHAKE_DONE: u8 = 0x12;

// =============================================================================
// CONNECTION PARAMETERS
// =============================================================================

/// Query parameter carrying the bearer credential.
pub const QUERY_AUTHORIZATION: &str = "authorization";

/// Query parameter carrying the session id.
pub const QUERY_SESSION_ID: &str = "x-cryo-sid";

/// Default bound on reaching an open transport.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default largest inbound message accepted (256 MiB).
pub const DEFAULT_MAX_PAYLOAD: usize = 256 * 1024 * 1024;

// =============================================================================
// RECONNECT BACKOFF
// =============================================================================

/// Connection attempts before giving up.
pub const BACKOFF_MAX_ATTEMPTS: u32 = 5;

/// Delay after the first failed attempt; doubles each attempt.
pub const BACKOFF_BASE_DELAY: Duration = Duration::from_millis(500);

/// Upper bound on a single backoff delay.
pub const BACKOFF_MAX_DELAY: Duration = Duration::from_millis(10_000);

// =============================================================================
// SESSION
// =============================================================================

/// Capacity of the command queue between a session handle and its task.
pub const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Reason sent with a graceful client close.
pub const GRACEFUL_CLOSE_REASON: &str = "Client finished.";
