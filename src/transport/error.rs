//! Transport layer error types.

use std::time::Duration;

use thiserror::Error;

use super::frame::FrameError;

/// Transport layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Frame parsing error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The transport did not open within the connect timeout.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The WebSocket upgrade or underlying connection failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Host or query parameters do not form a valid URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Writing a message failed.
    #[error("send failed: {0}")]
    Send(String),

    /// The transport is already closed.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Connection acquisition errors.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Every attempt of the backoff schedule failed.
    #[error("could not reach {host} after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Host part of the target URL.
        host: String,
        /// Number of attempts made.
        attempts: u32,
        /// Error from the last attempt.
        last_error: TransportError,
    },

    /// The connection URL could not be built.
    #[error(transparent)]
    Url(#[from] TransportError),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
