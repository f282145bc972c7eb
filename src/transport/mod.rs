//! Cryo Protocol - Transport Layer
//!
//! This module carries frames between the client and the server. It provides:
//!
//! - **Frame encoding/decoding**: [`Frame`], [`FrameType`] and header peeking
//! - **Close codes**: [`CloseCode`] with its reconnect classification
//! - **Transports**: the [`Transport`] / [`Connector`] seam, implemented by
//!   [`WebSocketConnector`] and the in-process [`MemoryConnector`]
//! - **Connection acquisition**: [`ConnectionHelper`] with [`BackoffPolicy`]
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Session                      │
//! ├─────────────────────────────────────────┤
//! │         Crypto Layer (CALE)             │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │   frames, close codes, reconnect        │
//! ├─────────────────────────────────────────┤
//! │         WebSocket                       │
//! └─────────────────────────────────────────┘
//! ```

mod close;
mod connection;
mod error;
mod frame;
mod memory;
mod socket;

pub use close::CloseCode;
pub use connection::*;
pub use error::*;
pub use frame::*;
pub use memory::*;
pub use socket::*;
