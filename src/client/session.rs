//! High-level Cryo session API.
//!
//! [`CryoSession`] is a cheap handle; the session itself runs as a tokio task
//! that owns the transport, the handshake state and the ack tracker.
//!
//! # Example
//!
//! ```no_run
//! use cryo_client::client::{CryoSession, SessionConfig, SessionEvent};
//!
//! # async fn run() -> Result<(), cryo_client::client::ClientError> {
//! let config = SessionConfig::builder("wss://cryo.example/ws", "token").build();
//! let (session, mut events) = CryoSession::connect(config).await?;
//!
//! session.send_utf8("hello").await?;
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::Utf8(text) => println!("{text}"),
//!         SessionEvent::Closed { .. } => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{Instrument, debug, info_span, warn};
use uuid::Uuid;

use super::config::SessionConfig;
use super::events::{SessionEvents, SessionStatus};
use super::state::{Escalation, SessionCore};
use crate::core::{COMMAND_QUEUE_CAPACITY, GRACEFUL_CLOSE_REASON};
use crate::transport::{
    CloseCode, ConnectError, ConnectionHelper, Connector, Transport, TransportEvent,
    WebSocketConnector, build_url,
};

/// Errors surfaced by the session API.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The initial connection could not be established.
    #[error("connection failed: {0}")]
    Connect(#[from] ConnectError),

    /// The session has ended.
    #[error("session closed")]
    SessionClosed,
}

#[derive(Debug)]
enum Command {
    SendUtf8(String),
    SendBinary(Vec<u8>),
    Close(CloseCode, String),
}

/// Handle to a running session.
///
/// Dropping the last handle closes the session gracefully.
#[derive(Debug)]
pub struct CryoSession {
    session_id: Uuid,
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SessionStatus>,
}

impl CryoSession {
    /// Connect over WebSocket.
    ///
    /// Returns once the transport is open; with CALE on, the handshake
    /// continues in the background and [`super::SessionEvent::Connected`] marks
    /// its completion.
    pub async fn connect(config: SessionConfig) -> Result<(Self, SessionEvents), ClientError> {
        let connector = WebSocketConnector::new(config.connect_timeout, config.max_payload);
        Self::connect_with(config, connector).await
    }

    /// Connect through any [`Connector`].
    pub async fn connect_with<C: Connector>(
        config: SessionConfig,
        connector: C,
    ) -> Result<(Self, SessionEvents), ClientError> {
        let session_id = Uuid::new_v4();
        let span = info_span!("cryo_session", sid = %session_id);

        let url = build_url(
            &config.host,
            &config.bearer,
            session_id,
            &config.query_params,
        )
        .map_err(ConnectError::from)?;
        let mut connection = ConnectionHelper::new(connector, url, config.backoff);
        connection.acquire().instrument(span.clone()).await?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus::Connecting);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);

        let mut core = SessionCore::new(session_id, &config, event_tx, status_tx);
        core.attach();

        let actor = SessionActor {
            core,
            connection,
            commands: command_rx,
        };
        tokio::spawn(actor.run().instrument(span));

        let session = Self {
            session_id,
            commands: command_tx,
            status: status_rx,
        };
        Ok((session, SessionEvents { rx: event_rx }))
    }

    /// Send UTF-8 text.
    ///
    /// Queued until the channel is usable when called during a handshake or
    /// reconnect.
    pub async fn send_utf8(&self, text: impl Into<String>) -> Result<(), ClientError> {
        self.command(Command::SendUtf8(text.into())).await
    }

    /// Send opaque bytes.
    pub async fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<(), ClientError> {
        self.command(Command::SendBinary(data.into())).await
    }

    /// Close gracefully with code 4000.
    ///
    /// Returns once the session has ended; later sends fail with
    /// [`ClientError::SessionClosed`].
    pub async fn close(&self) -> Result<(), ClientError> {
        self.close_with(CloseCode::Graceful, GRACEFUL_CLOSE_REASON)
            .await
    }

    /// Close with any code and reason. The session does not reconnect.
    pub async fn close_with(
        &self,
        code: CloseCode,
        reason: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.command(Command::Close(code, reason.into())).await?;

        let mut status = self.status.clone();
        // An error means the task is gone, which is just as closed
        let _ = status.wait_for(|s| *s == SessionStatus::Closed).await;
        Ok(())
    }

    async fn command(&self, command: Command) -> Result<(), ClientError> {
        if self.status() == SessionStatus::Closed {
            return Err(ClientError::SessionClosed);
        }
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::SessionClosed)
    }

    /// The session id, stable across reconnects.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// A receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Whether the channel is currently encrypted.
    pub fn is_secure(&self) -> bool {
        self.status() == SessionStatus::Secure
    }
}

/// How the current transport ended.
enum Interrupt {
    /// Reconnect; carries the code and reason that caused it.
    Reconnect(u16, String),
    /// End the session with this code and reason.
    Finish(CloseCode, String),
}

struct SessionActor<C: Connector> {
    core: SessionCore,
    connection: ConnectionHelper<C>,
    commands: mpsc::Receiver<Command>,
}

impl<C: Connector> SessionActor<C> {
    async fn run(mut self) {
        loop {
            let interrupt = match self.serve().await {
                Some(interrupt) => interrupt,
                None => return,
            };

            match interrupt {
                Interrupt::Finish(code, reason) => {
                    self.core.finish(code, reason);
                    return;
                }
                Interrupt::Reconnect(code, reason) => {
                    self.core.detach();
                    if !self.reconnect(code, reason).await {
                        return;
                    }
                }
            }
        }
    }

    /// Serve the current transport until it ends. `None` once the session
    /// is finished.
    async fn serve(&mut self) -> Option<Interrupt> {
        loop {
            if let Some(interrupt) = self.flush().await {
                return Some(interrupt);
            }
            if self.core.is_closed() {
                return None;
            }

            let Some(socket) = self.connection.socket_mut() else {
                return Some(Interrupt::Reconnect(1006, String::new()));
            };

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::SendUtf8(text)) => self.core.send_utf8(text),
                    Some(Command::SendBinary(data)) => self.core.send_binary(data),
                    Some(Command::Close(code, reason)) => {
                        self.close_transport(code, &reason).await;
                        return Some(Interrupt::Finish(code, reason));
                    }
                    None => {
                        self.close_transport(CloseCode::Graceful, GRACEFUL_CLOSE_REASON).await;
                        return Some(Interrupt::Finish(
                            CloseCode::Graceful,
                            GRACEFUL_CLOSE_REASON.to_owned(),
                        ));
                    }
                },
                event = socket.recv() => match event {
                    Some(TransportEvent::Message(raw)) => self.core.on_message(&raw),
                    Some(TransportEvent::Error(e)) => {
                        warn!(error = %e, "transport error");
                        return Some(self.transport_failed().await);
                    }
                    Some(TransportEvent::Closed { code, reason }) => {
                        return Some(self.transport_closed(code, reason));
                    }
                    None => return Some(self.transport_closed(1006, String::new())),
                },
            }
        }
    }

    /// Send queued wire bytes and act on escalations.
    async fn flush(&mut self) -> Option<Interrupt> {
        while let Some(outbound) = self.core.next_outbound() {
            let Some(socket) = self.connection.socket_mut() else {
                self.core.unsent(outbound.ack_id);
                break;
            };
            if let Err(e) = socket.send(outbound.wire).await {
                warn!(error = %e, "send failed");
                self.core.unsent(outbound.ack_id);
                return Some(self.transport_failed().await);
            }
        }

        match self.core.take_escalation()? {
            Escalation::TransportError(e) => {
                warn!(error = %e, "transport error");
                Some(self.transport_failed().await)
            }
            Escalation::Fatal(code, reason) => {
                self.close_transport(code, &reason).await;
                Some(Interrupt::Finish(code, reason))
            }
        }
    }

    async fn close_transport(&mut self, code: CloseCode, reason: &str) {
        if let Some(mut socket) = self.connection.discard() {
            debug!(code = code.as_u16(), reason, "closing transport");
            if let Err(e) = socket.close(code.as_u16(), reason).await {
                debug!(error = %e, "close failed");
            }
        }
    }

    /// Force-close the transport with 4002 and reconnect.
    async fn transport_failed(&mut self) -> Interrupt {
        let code = CloseCode::ServerError;
        let reason = format!(
            "CryoSocket {} was closed due to an error.",
            self.core.session_id()
        );
        self.close_transport(code, &reason).await;
        Interrupt::Reconnect(code.as_u16(), reason)
    }

    fn transport_closed(&mut self, code: u16, reason: String) -> Interrupt {
        self.connection.discard();
        let close = CloseCode::from(code);
        if close.should_reconnect() {
            warn!(code, %reason, "transport closed: {}, reconnecting", close.description());
            Interrupt::Reconnect(code, reason)
        } else {
            Interrupt::Finish(close, reason)
        }
    }

    /// Acquire a new transport while still accepting commands.
    ///
    /// Returns `false` if the session ended instead.
    async fn reconnect(&mut self, code: u16, reason: String) -> bool {
        let connection = &mut self.connection;
        let core = &mut self.core;
        let commands = &mut self.commands;

        let acquire = connection.acquire();
        tokio::pin!(acquire);

        loop {
            tokio::select! {
                result = &mut acquire => {
                    return match result {
                        Ok(_) => {
                            core.attach();
                            true
                        }
                        Err(e) => {
                            warn!(error = %e, "gave up reconnecting");
                            core.finish(CloseCode::from(code), format!("{reason} ({e})"));
                            false
                        }
                    };
                }
                command = commands.recv() => match command {
                    Some(Command::SendUtf8(text)) => core.send_utf8(text),
                    Some(Command::SendBinary(data)) => core.send_binary(data),
                    Some(Command::Close(code, reason)) => {
                        core.finish(code, reason);
                        return false;
                    }
                    None => {
                        core.finish(CloseCode::Graceful, GRACEFUL_CLOSE_REASON.to_owned());
                        return false;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SessionEvent;
    use crate::transport::{MemoryConnector, PeerMessage};

    #[tokio::test]
    async fn test_connect_failure_is_error() {
        let (connector, _listener) = MemoryConnector::new();
        connector.fail_next(u32::MAX);
        let config = SessionConfig::builder("ws://cryo.test", "token")
            .backoff(crate::transport::BackoffPolicy {
                max_attempts: 2,
                base_delay: std::time::Duration::from_millis(1),
                max_delay: std::time::Duration::from_millis(1),
            })
            .build();

        let result = CryoSession::connect_with(config, connector.clone()).await;
        assert!(matches!(
            result,
            Err(ClientError::Connect(ConnectError::Exhausted { attempts: 2, .. }))
        ));
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test]
    async fn test_invalid_host_is_error() {
        let (connector, _listener) = MemoryConnector::new();
        let config = SessionConfig::new("not a url", "token");
        let result = CryoSession::connect_with(config, connector).await;
        assert!(matches!(
            result,
            Err(ClientError::Connect(ConnectError::Url(_)))
        ));
    }

    #[tokio::test]
    async fn test_url_carries_credentials() {
        let (connector, mut listener) = MemoryConnector::new();
        let config = SessionConfig::builder("ws://cryo.test/ws", "token")
            .use_cale(false)
            .query_param("client", "tests")
            .build();

        let (session, _events) = CryoSession::connect_with(config, connector).await.unwrap();
        let peer = listener.accept().await.unwrap();
        let pairs: Vec<(String, String)> = peer.url().query_pairs().into_owned().collect();

        assert!(pairs.contains(&("authorization".into(), "Bearer token".into())));
        assert!(pairs.contains(&("x-cryo-sid".into(), session.session_id().to_string())));
        assert!(pairs.contains(&("client".into(), "tests".into())));
    }

    #[tokio::test]
    async fn test_drop_closes_gracefully() {
        let (connector, mut listener) = MemoryConnector::new();
        let config = SessionConfig::builder("ws://cryo.test", "token")
            .use_cale(false)
            .build();

        let (session, mut events) = CryoSession::connect_with(config, connector).await.unwrap();
        let mut peer = listener.accept().await.unwrap();
        assert_eq!(events.recv().await, Some(SessionEvent::Connected));

        drop(session);
        assert_eq!(
            peer.recv().await,
            Some(PeerMessage::Close {
                code: 4000,
                reason: "Client finished.".into()
            })
        );
        assert_eq!(
            events.recv().await,
            Some(SessionEvent::Closed {
                code: 4000,
                reason: "Client finished.".into()
            })
        );
        assert_eq!(events.recv().await, None);
    }
}
