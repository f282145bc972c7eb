//! Transport abstraction and its WebSocket implementation.
//!
//! The session layer only talks to [`Transport`] and [`Connector`], so the
//! same state machine runs over a real WebSocket or over the in-memory pair
//! in [`super::memory`].

use std::future::Future;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use url::Url;

use super::error::{TransportError, TransportResult};
use crate::core::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_PAYLOAD};

/// Close code reported when the stream ends without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code reported for a close frame without a status.
const NO_STATUS: u16 = 1005;

/// Something observed on an open transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One complete message.
    Message(Vec<u8>),
    /// A read error. The transport may still deliver a close afterwards.
    Error(String),
    /// The transport closed.
    Closed {
        /// Close code.
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
}

/// An open, message-oriented, bidirectional channel.
///
/// `recv` must be cancel safe: it is polled inside `select!`.
pub trait Transport: Send + 'static {
    /// Send one binary message.
    fn send(&mut self, data: Vec<u8>) -> impl Future<Output = TransportResult<()>> + Send;

    /// Wait for the next event. Returns `None` once `Closed` was delivered.
    fn recv(&mut self) -> impl Future<Output = Option<TransportEvent>> + Send;

    /// Close with a code and reason.
    fn close(
        &mut self,
        code: u16,
        reason: &str,
    ) -> impl Future<Output = TransportResult<()>> + Send;
}

/// Opens transports to a URL.
pub trait Connector: Send + Sync + 'static {
    /// Transport produced by this connector.
    type Transport: Transport;

    /// Make a single connection attempt.
    fn connect(&self, url: &Url) -> impl Future<Output = TransportResult<Self::Transport>> + Send;
}

/// Connects over WebSocket (ws:// or wss://).
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
    max_payload: usize,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_PAYLOAD)
    }
}

impl WebSocketConnector {
    /// Create a connector with the given open timeout and inbound size limit.
    pub fn new(connect_timeout: Duration, max_payload: usize) -> Self {
        Self {
            connect_timeout,
            max_payload,
        }
    }

    /// Open timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Largest inbound message accepted.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }
}

impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport;

    async fn connect(&self, url: &Url) -> TransportResult<WebSocketTransport> {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.max_payload);
        config.max_frame_size = Some(self.max_payload);

        let attempt = connect_async_with_config(url.as_str(), Some(config), false);
        let (stream, _response) = tokio::time::timeout(self.connect_timeout, attempt)
            .await
            .map_err(|_| TransportError::ConnectTimeout(self.connect_timeout))?
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        Ok(WebSocketTransport {
            stream,
            finished: false,
        })
    }
}

/// An open WebSocket.
pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    finished: bool,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl Transport for WebSocketTransport {
    async fn send(&mut self, data: Vec<u8>) -> TransportResult<()> {
        if self.finished {
            return Err(TransportError::ConnectionClosed);
        }
        self.stream
            .send(Message::Binary(data.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<TransportEvent> {
        if self.finished {
            return None;
        }

        loop {
            let event = match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => TransportEvent::Message(data.to_vec()),
                // Servers may send frames as text; the bytes are the same
                Some(Ok(Message::Text(text))) => {
                    TransportEvent::Message(text.as_str().as_bytes().to_vec())
                }
                Some(Ok(Message::Close(frame))) => {
                    self.finished = true;
                    match frame {
                        Some(frame) => TransportEvent::Closed {
                            code: u16::from(frame.code),
                            reason: frame.reason.as_str().to_owned(),
                        },
                        None => TransportEvent::Closed {
                            code: NO_STATUS,
                            reason: String::new(),
                        },
                    }
                }
                // Control frames are answered by tungstenite itself
                Some(Ok(_)) => continue,
                Some(Err(e)) => TransportEvent::Error(e.to_string()),
                None => {
                    self.finished = true;
                    TransportEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: String::new(),
                    }
                }
            };
            return Some(event);
        }
    }

    async fn close(&mut self, code: u16, reason: &str) -> TransportResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        let frame = CloseFrame {
            code: WsCloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        self.stream
            .close(Some(frame))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}
