//! In-process loopback transport.
//!
//! [`MemoryConnector`] hands every accepted connection's server half to a
//! [`MemoryListener`] as a [`MemoryPeer`]. Failures can be scripted to
//! exercise reconnect paths without a network.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use url::Url;

use super::error::{TransportError, TransportResult};
use super::socket::{Connector, Transport, TransportEvent};

/// What the client half delivered to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    /// One binary message.
    Data(Vec<u8>),
    /// The client closed the transport.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

#[derive(Debug, Default)]
struct ConnectorState {
    fail_next: u32,
    attempts: u32,
    urls: Vec<Url>,
}

/// Connector producing in-memory transports.
///
/// Clones share state, so a test can keep one handle while a session owns
/// another.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    state: Arc<Mutex<ConnectorState>>,
    accepted: mpsc::UnboundedSender<MemoryPeer>,
}

/// Receives the server half of each accepted connection.
#[derive(Debug)]
pub struct MemoryListener {
    accepted: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    /// Wait for the next connection. `None` once every connector is dropped.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accepted.recv().await
    }
}

impl MemoryConnector {
    /// Create a connector and its listener.
    pub fn new() -> (Self, MemoryListener) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            state: Arc::new(Mutex::new(ConnectorState::default())),
            accepted: tx,
        };
        (connector, MemoryListener { accepted: rx })
    }

    fn state(&self) -> MutexGuard<'_, ConnectorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `count` connection attempts fail.
    pub fn fail_next(&self, count: u32) {
        self.state().fail_next = count;
    }

    /// Number of connection attempts so far, failed ones included.
    pub fn attempts(&self) -> u32 {
        self.state().attempts
    }

    /// URLs of every attempt, in order.
    pub fn urls(&self) -> Vec<Url> {
        self.state().urls.clone()
    }
}

impl Connector for MemoryConnector {
    type Transport = MemoryTransport;

    async fn connect(&self, url: &Url) -> TransportResult<MemoryTransport> {
        {
            let mut state = self.state();
            state.attempts += 1;
            state.urls.push(url.clone());
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(TransportError::Connect("connection refused".into()));
            }
        }

        let (to_peer, from_client) = mpsc::unbounded_channel();
        let (to_client, from_peer) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            url: url.clone(),
            to_client,
            from_client,
        };
        self.accepted
            .send(peer)
            .map_err(|_| TransportError::Connect("listener dropped".into()))?;

        Ok(MemoryTransport {
            to_peer,
            from_peer,
            finished: false,
        })
    }
}

/// Client half of an in-memory connection.
#[derive(Debug)]
pub struct MemoryTransport {
    to_peer: mpsc::UnboundedSender<PeerMessage>,
    from_peer: mpsc::UnboundedReceiver<TransportEvent>,
    finished: bool,
}

impl Transport for MemoryTransport {
    async fn send(&mut self, data: Vec<u8>) -> TransportResult<()> {
        if self.finished {
            return Err(TransportError::ConnectionClosed);
        }
        self.to_peer
            .send(PeerMessage::Data(data))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&mut self) -> Option<TransportEvent> {
        if self.finished {
            return None;
        }
        match self.from_peer.recv().await {
            Some(event) => {
                if matches!(event, TransportEvent::Closed { .. }) {
                    self.finished = true;
                }
                Some(event)
            }
            // Peer dropped without a close frame
            None => {
                self.finished = true;
                Some(TransportEvent::Closed {
                    code: 1006,
                    reason: String::new(),
                })
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) -> TransportResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        // The peer may already be gone
        let _ = self.to_peer.send(PeerMessage::Close {
            code,
            reason: reason.to_owned(),
        });
        Ok(())
    }
}

/// Server half of an in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    url: Url,
    to_client: mpsc::UnboundedSender<TransportEvent>,
    from_client: mpsc::UnboundedReceiver<PeerMessage>,
}

impl MemoryPeer {
    /// URL the client connected to.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Send one message to the client. Returns `false` if it is gone.
    pub fn send(&self, data: Vec<u8>) -> bool {
        self.to_client.send(TransportEvent::Message(data)).is_ok()
    }

    /// Inject a transport read error.
    pub fn send_error(&self, message: &str) -> bool {
        self.to_client
            .send(TransportEvent::Error(message.to_owned()))
            .is_ok()
    }

    /// Close the connection with a code and reason.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.to_client
            .send(TransportEvent::Closed {
                code,
                reason: reason.to_owned(),
            })
            .is_ok()
    }

    /// Next message from the client. `None` once the client half is dropped.
    pub async fn recv(&mut self) -> Option<PeerMessage> {
        self.from_client.recv().await
    }
}
