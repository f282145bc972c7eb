//! # Cryo client
//!
//! Client session layer for Cryo, a framed messaging protocol carried over
//! WebSocket. A session provides:
//!
//! - **Framing**: a 21-byte header (type, session id, ack id) ahead of every payload
//! - **Acknowledgments**: every data frame is tracked until the server confirms it
//! - **Reconnection**: classified close codes and exponential backoff
//! - **CALE**: optional application-layer encryption (P-256 ECDH, AES-128-GCM)
//!
//! ## Feature Flags
//!
//! - `transport` (default): frame codec, close codes, WebSocket transport, backoff
//! - `crypto` (default): key exchange, handshake engine, crypto box
//! - `sync` (default): ack counter and pending-frame tracker
//! - `client` (default): the [`CryoSession`](client::CryoSession) API
//!
//! ## Modules
//!
//! - [`core`]: constants and error types (always included)
//! - [`transport`]: wire layer (requires `transport` feature)
//! - [`crypto`]: CALE (requires `crypto` feature)
//! - [`sync`]: acknowledgment bookkeeping (requires `sync` feature)
//! - [`client`]: session API (requires `client` feature)
//!
//! ## Example Usage
//!
//! ```no_run
//! use cryo_client::prelude::*;
//!
//! # async fn run() -> Result<(), ClientError> {
//! let (session, mut events) = cryo_client::connect("wss://cryo.example/ws", "token").await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::Connected => session.send_utf8("hello").await?,
//!         SessionEvent::Utf8(text) => println!("server: {text}"),
//!         SessionEvent::Closed { .. } => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Transport layer (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

// Crypto layer (feature-gated)
#[cfg(feature = "crypto")]
#[cfg_attr(docsrs, doc(cfg(feature = "crypto")))]
pub mod crypto;

// Ack bookkeeping (feature-gated)
#[cfg(feature = "sync")]
#[cfg_attr(docsrs, doc(cfg(feature = "sync")))]
pub mod sync;

// Client API (feature-gated)
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;

    #[cfg(feature = "transport")]
    pub use crate::transport::{
        BackoffPolicy, CloseCode, ConnectError, Frame, FrameError, FrameType, TransportError,
    };

    #[cfg(feature = "client")]
    pub use crate::client::{
        ClientError, CryoSession, SessionConfig, SessionEvent, SessionEvents, SessionStatus,
    };
}

pub use crate::core::{CryptoError, HandshakeError};

#[cfg(feature = "transport")]
pub use transport::{CloseCode, Frame, FrameType};

#[cfg(feature = "client")]
pub use client::{ClientError, CryoSession, SessionConfig, SessionEvent, SessionEvents};

/// Open a session with default settings (CALE on).
///
/// Returns once the first transport is open. See [`CryoSession::connect`].
#[cfg(feature = "client")]
pub async fn connect(
    host: impl Into<String>,
    bearer: impl Into<String>,
) -> Result<(CryoSession, SessionEvents), ClientError> {
    CryoSession::connect(SessionConfig::new(host, bearer)).await
}
