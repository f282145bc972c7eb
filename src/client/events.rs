//! Lifecycle events and status published by a session.

use tokio::sync::mpsc;

/// Something a session reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The channel became usable for the first time.
    ///
    /// With CALE on this fires after the handshake completes.
    Connected,
    /// The transport was lost; the session is reconnecting.
    Disconnected,
    /// The channel is usable again after a reconnect.
    Reconnected,
    /// The session ended. No further events follow.
    Closed {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// UTF-8 payload from the server.
    Utf8(String),
    /// Binary payload from the server.
    Binary(Vec<u8>),
}

/// Coarse session phase, observable through a `watch` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Acquiring the first transport.
    Connecting,
    /// Transport open, key exchange running.
    Handshaking,
    /// Encrypted channel established.
    Secure,
    /// Plaintext channel established (CALE disabled).
    Open,
    /// Transport lost, acquiring a new one.
    Reconnecting,
    /// Session ended.
    Closed,
}

impl SessionStatus {
    /// Whether application data is transmitted immediately.
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Secure | Self::Open)
    }
}

/// Receiving half of a session's event stream.
#[derive(Debug)]
pub struct SessionEvents {
    pub(crate) rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionEvents {
    /// Receive the next event.
    ///
    /// Returns `None` after the session task has ended and every event was
    /// consumed.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Receive an event if one is ready.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }
}
