//! Session state machine without I/O.
//!
//! [`SessionCore`] consumes inbound messages and user commands and produces
//! wire bytes in an outbox plus [`SessionEvent`]s. The async task in
//! [`super::session`] only moves bytes between the core and the transport.

use std::collections::{BTreeSet, VecDeque};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::config::SessionConfig;
use super::events::{SessionEvent, SessionStatus};
use super::router::{FrameHandler, FrameRouter, RouteError};
use crate::core::{CryptoError, HandshakeError};
use crate::crypto::{CryptoBox, HandshakeEngine, HandshakeState};
use crate::sync::{AckCounter, AckTracker, PendingOutbound};
use crate::transport::{CloseCode, Frame, FrameType, peek_type, seal};

/// Where the session is in its lifecycle.
///
/// Keys only exist inside `Secure`.
#[derive(Debug)]
pub(crate) enum Phase {
    /// No transport attached.
    Connecting,
    /// Transport attached, key exchange running.
    Handshaking(HandshakeEngine),
    /// Encrypted channel.
    Secure(CryptoBox),
    /// Plaintext channel (CALE disabled).
    Plaintext,
    /// Terminal.
    Closed { code: CloseCode, reason: String },
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Self::Connecting => "CONNECTING",
            Self::Handshaking(engine) => engine.state().name(),
            Self::Secure(_) => HandshakeState::Secure.name(),
            Self::Plaintext => "PLAINTEXT",
            Self::Closed { .. } => "CLOSED",
        }
    }

    fn is_usable(&self) -> bool {
        matches!(self, Self::Secure(_) | Self::Plaintext)
    }
}

/// What the I/O task must do after the core handled an input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Escalation {
    /// Close the transport with 4002 and reconnect.
    TransportError(String),
    /// Close the transport with this code and end the session.
    Fatal(CloseCode, String),
}

/// Wire bytes waiting for the transport.
#[derive(Debug)]
pub(crate) struct Outbound {
    /// Set for data frames, which go back to the deferred queue if unsent.
    pub(crate) ack_id: Option<u32>,
    pub(crate) wire: Vec<u8>,
}

/// Frame handlers and everything they mutate.
pub(crate) struct SessionState {
    sid: Uuid,
    use_cale: bool,
    resend_unacked: bool,
    phase: Phase,
    acks: AckCounter,
    tracker: AckTracker,
    /// Data frames not yet handed to any transport, by ack id.
    deferred: BTreeSet<u32>,
    outbox: VecDeque<Outbound>,
    escalation: Option<Escalation>,
    announced: bool,
    events: mpsc::UnboundedSender<SessionEvent>,
    status: watch::Sender<SessionStatus>,
}

impl SessionState {
    fn emit(&self, event: SessionEvent) {
        // The owner may have dropped the event stream; the session keeps running
        let _ = self.events.send(event);
    }

    fn set_status(&self, status: SessionStatus) {
        self.status.send_replace(status);
    }

    fn escalate(&mut self, escalation: Escalation) {
        // Fatal wins over transport errors; the first fatal reason is kept
        match (&self.escalation, &escalation) {
            (Some(Escalation::Fatal(..)), _) => {}
            (Some(Escalation::TransportError(_)), Escalation::TransportError(_)) => {}
            _ => self.escalation = Some(escalation),
        }
    }

    fn handshake_failed(&mut self, err: HandshakeError) {
        warn!(error = %err, "handshake failure");
        self.escalate(Escalation::Fatal(
            CloseCode::CaleHandshake,
            "Failure during CALE handshake.".into(),
        ));
    }

    /// Wire bytes for a frame on the current channel.
    fn finalize(&mut self, frame_type: FrameType, plain: Vec<u8>) -> Option<Vec<u8>> {
        let Phase::Secure(crypto) = &self.phase else {
            return Some(plain);
        };
        if frame_type.is_handshake() {
            return Some(plain);
        }
        match crypto.encrypt(&plain, &[frame_type.as_byte()]) {
            Ok(body) => Some(seal(frame_type, body)),
            Err(e) => {
                self.escalate(Escalation::TransportError(e.to_string()));
                None
            }
        }
    }

    fn enqueue(&mut self, frame: &Frame) {
        if let Some(wire) = self.finalize(frame.frame_type, frame.encode()) {
            debug!(%frame, "sending");
            self.outbox.push_back(Outbound { ack_id: None, wire });
        }
    }

    /// Move unsent data frames back to the deferred queue.
    fn defer_outbox(&mut self) {
        for outbound in self.outbox.drain(..) {
            if let Some(ack_id) = outbound.ack_id {
                self.deferred.insert(ack_id);
            }
        }
    }

    /// The channel just became usable: announce it and flush queued data.
    fn channel_usable(&mut self) {
        if self.announced {
            info!("session reconnected");
            self.emit(SessionEvent::Reconnected);
        } else {
            info!("session connected");
            self.announced = true;
            self.emit(SessionEvent::Connected);
        }
        self.set_status(match self.phase {
            Phase::Secure(_) => SessionStatus::Secure,
            _ => SessionStatus::Open,
        });

        let replay: Vec<(u32, Vec<u8>)> = self
            .tracker
            .pending()
            .filter(|r| self.resend_unacked || self.deferred.contains(&r.ack_id))
            .map(|r| (r.ack_id, r.raw_message.clone()))
            .collect();
        self.deferred.clear();

        for (ack_id, raw) in replay {
            let frame_type = peek_type(&raw).unwrap_or(FrameType::BinaryData);
            trace!(ack_id, "flushing queued data frame");
            if let Some(wire) = self.finalize(frame_type, raw) {
                self.outbox.push_back(Outbound {
                    ack_id: Some(ack_id),
                    wire,
                });
            }
        }
    }

    fn send_data(&mut self, frame_type: FrameType, payload: Vec<u8>) {
        if matches!(self.phase, Phase::Closed { .. }) {
            return;
        }
        let Some(ack) = self.acks.next_id() else {
            warn!("ack id space exhausted, dropping outbound data");
            return;
        };
        let frame = Frame::new(frame_type, self.sid, ack, payload);
        let raw = frame.encode();
        self.tracker.track(PendingOutbound::new(ack, raw.clone()));

        if self.phase.is_usable() {
            debug!(%frame, "sending");
            if let Some(wire) = self.finalize(frame_type, raw) {
                self.outbox.push_back(Outbound {
                    ack_id: Some(ack),
                    wire,
                });
            }
        } else {
            debug!(%frame, phase = self.phase.name(), "channel not ready, queueing");
            self.deferred.insert(ack);
        }
    }
}

impl FrameHandler for SessionState {
    fn is_secure(&self) -> bool {
        matches!(self.phase, Phase::Secure(_))
    }

    fn decrypt(&mut self, frame_type: FrameType, body: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match &self.phase {
            Phase::Secure(crypto) => crypto.decrypt(body, &[frame_type.as_byte()]),
            _ => Err(CryptoError::DecryptionFailed),
        }
    }

    fn on_ping_pong(&mut self, frame: Frame) {
        let reply = match frame.frame_type {
            FrameType::Ping => Frame::pong(self.sid, frame.ack),
            _ => Frame::ping(self.sid, frame.ack),
        };
        self.enqueue(&reply);
    }

    fn on_ack(&mut self, frame: Frame) {
        match self.tracker.confirm(frame.ack) {
            Some(record) => debug!(
                ack_id = frame.ack,
                rtt = ?record.timestamp.elapsed(),
                "data frame acknowledged"
            ),
            None => warn!(ack_id = frame.ack, "unknown ack id from server"),
        }
    }

    fn on_error(&mut self, frame: Frame) {
        warn!(text = frame.text().unwrap_or_default(), "server reported an error");
    }

    fn on_data(&mut self, frame: Frame) {
        self.enqueue(&Frame::ack(self.sid, frame.ack));
        let event = match frame.frame_type {
            FrameType::Utf8Data => match String::from_utf8(frame.payload) {
                Ok(text) => SessionEvent::Utf8(text),
                Err(_) => return,
            },
            _ => SessionEvent::Binary(frame.payload),
        };
        self.emit(event);
    }

    fn on_server_hello(&mut self, frame: Frame) {
        let result = match &mut self.phase {
            Phase::Handshaking(engine) => engine.on_server_hello(&frame, &mut self.acks),
            other => Err(HandshakeError::UnexpectedFrame {
                frame: FrameType::ServerHello.name(),
                state: other.name(),
            }),
        };
        match result {
            Ok(reply) => {
                debug!("server hello accepted");
                self.enqueue(&reply);
            }
            Err(e) => self.handshake_failed(e),
        }
    }

    fn on_handshake_done(&mut self, frame: Frame) {
        let result = match &mut self.phase {
            Phase::Handshaking(engine) => engine.on_server_handshake_done(&frame),
            other => Err(HandshakeError::UnexpectedFrame {
                frame: FrameType::HandshakeDone.name(),
                state: other.name(),
            }),
        };
        match result {
            Ok((reply, keys)) => {
                // Echo goes out in plaintext, everything after is sealed
                self.enqueue(&reply);
                self.phase = Phase::Secure(CryptoBox::new(keys));
                info!("channel secured");
                self.channel_usable();
            }
            Err(e) => self.handshake_failed(e),
        }
    }
}

/// Router plus frame handlers for one session.
pub(crate) struct SessionCore {
    router: FrameRouter,
    state: SessionState,
}

impl SessionCore {
    pub(crate) fn new(
        sid: Uuid,
        config: &SessionConfig,
        events: mpsc::UnboundedSender<SessionEvent>,
        status: watch::Sender<SessionStatus>,
    ) -> Self {
        Self {
            router: FrameRouter::new(config.use_cale),
            state: SessionState {
                sid,
                use_cale: config.use_cale,
                resend_unacked: config.resend_unacked_on_reconnect,
                phase: Phase::Connecting,
                acks: AckCounter::new(),
                tracker: AckTracker::new(),
                deferred: BTreeSet::new(),
                outbox: VecDeque::new(),
                escalation: None,
                announced: false,
                events,
                status,
            },
        }
    }

    /// A fresh transport is open. Every attach starts a new key exchange.
    pub(crate) fn attach(&mut self) {
        let state = &mut self.state;
        self.router.reset();
        state.defer_outbox();
        if state.use_cale {
            state.phase = Phase::Handshaking(HandshakeEngine::new(state.sid));
            state.set_status(SessionStatus::Handshaking);
            debug!("transport attached, waiting for server hello");
        } else {
            info!("CALE disabled, running in unencrypted mode");
            state.phase = Phase::Plaintext;
            state.channel_usable();
        }
    }

    /// The transport is gone and a reconnect follows.
    pub(crate) fn detach(&mut self) {
        let state = &mut self.state;
        state.phase = Phase::Connecting;
        state.defer_outbox();
        state.escalation = None;
        state.set_status(SessionStatus::Reconnecting);
        state.emit(SessionEvent::Disconnected);
    }

    /// The session ended.
    pub(crate) fn finish(&mut self, code: CloseCode, reason: String) {
        let state = &mut self.state;
        if let Phase::Closed { code, reason } = &state.phase {
            debug!(code = %code, %reason, "session already closed");
            return;
        }
        info!(code = code.as_u16(), reason = %reason, "session closed: {}", code.description());
        state.outbox.clear();
        state.emit(SessionEvent::Closed {
            code: code.as_u16(),
            reason: reason.clone(),
        });
        state.phase = Phase::Closed { code, reason };
        state.set_status(SessionStatus::Closed);
    }

    /// Handle one inbound transport message.
    pub(crate) fn on_message(&mut self, raw: &[u8]) {
        match self.router.route(raw, &mut self.state) {
            Ok(_) => {}
            Err(RouteError::Crypto(e)) => {
                warn!(error = %e, "could not decrypt inbound frame");
                self.state
                    .escalate(Escalation::TransportError(e.to_string()));
            }
            Err(RouteError::UnexpectedFirstFrame(found)) => {
                warn!(%found, "CALE mismatch: expected SERVER_HELLO");
                self.state.escalate(Escalation::Fatal(
                    CloseCode::CaleMismatch,
                    "CALE mismatch: The server has disabled CALE.".into(),
                ));
            }
            Err(RouteError::CaleMismatch) => {
                warn!("CALE mismatch: server expects CALE, which is disabled");
                self.state.escalate(Escalation::Fatal(
                    CloseCode::CaleMismatch,
                    "CALE Mismatch. The server expects CALE encryption, which is currently disabled."
                        .into(),
                ));
            }
            Err(e) => warn!(error = %e, "dropping inbound frame"),
        }
    }

    /// Queue a UTF-8 data frame.
    pub(crate) fn send_utf8(&mut self, text: String) {
        self.state.send_data(FrameType::Utf8Data, text.into_bytes());
    }

    /// Queue a binary data frame.
    pub(crate) fn send_binary(&mut self, data: Vec<u8>) {
        self.state.send_data(FrameType::BinaryData, data);
    }

    /// Next wire message for the current transport.
    pub(crate) fn next_outbound(&mut self) -> Option<Outbound> {
        self.state.outbox.pop_front()
    }

    /// A message taken with [`Self::next_outbound`] never reached the
    /// transport. Data frames are sent again once a channel is usable.
    pub(crate) fn unsent(&mut self, ack_id: Option<u32>) {
        if let Some(ack_id) = ack_id {
            debug!(ack_id, "data frame not sent, deferring");
            self.state.deferred.insert(ack_id);
        }
    }

    #[cfg(test)]
    fn take_outbox(&mut self) -> Vec<Vec<u8>> {
        self.state.outbox.drain(..).map(|o| o.wire).collect()
    }

    /// Pending escalation from the last input, if any.
    pub(crate) fn take_escalation(&mut self) -> Option<Escalation> {
        self.state.escalation.take()
    }

    pub(crate) fn session_id(&self) -> Uuid {
        self.state.sid
    }

    pub(crate) fn is_closed(&self) -> bool {
        matches!(self.state.phase, Phase::Closed { .. })
    }

    #[cfg(test)]
    fn phase(&self) -> &Phase {
        &self.state.phase
    }

    #[cfg(test)]
    fn pending_acks(&self) -> usize {
        self.state.tracker.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{EphemeralKeyPair, Role};
    use crate::transport::unseal;

    struct Harness {
        core: SessionCore,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        status: watch::Receiver<SessionStatus>,
    }

    fn harness(use_cale: bool) -> Harness {
        let config = SessionConfig::builder("ws://cryo.test", "token")
            .use_cale(use_cale)
            .build();
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus::Connecting);
        Harness {
            core: SessionCore::new(Uuid::from_bytes([1; 16]), &config, tx, status_tx),
            events: rx,
            status: status_rx,
        }
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    /// Run the server half of the handshake; returns the server's crypto box.
    fn complete_handshake(h: &mut Harness) -> CryptoBox {
        let server = EphemeralKeyPair::generate();
        let sid = Uuid::from_bytes([1; 16]);
        h.core
            .on_message(&Frame::server_hello(sid, 0, server.public_key()).encode());
        let out = h.core.take_outbox();
        let hello = Frame::decode(&out[0]).unwrap();
        assert_eq!(hello.frame_type, FrameType::ClientHello);

        let keys = server.diffie_hellman(&hello.payload, Role::Server).unwrap();
        h.core.on_message(&Frame::handshake_done(sid, 1).encode());
        CryptoBox::new(keys)
    }

    #[test]
    fn test_plaintext_attach_is_usable() {
        let mut h = harness(false);
        h.core.attach();

        assert!(matches!(h.core.phase(), Phase::Plaintext));
        assert_eq!(*h.status.borrow(), SessionStatus::Open);
        assert_eq!(drain(&mut h.events), vec![SessionEvent::Connected]);
    }

    #[test]
    fn test_data_queued_until_secure() {
        let mut h = harness(true);
        h.core.attach();

        h.core.send_utf8("ping-me".into());
        assert!(h.core.take_outbox().is_empty());
        assert_eq!(h.core.pending_acks(), 1);

        let server_box = complete_handshake(&mut h);
        let out = h.core.take_outbox();

        // HANDSHAKE_DONE echo in plaintext, then the queued data sealed
        assert_eq!(out.len(), 2);
        assert_eq!(Frame::decode(&out[0]).unwrap().frame_type, FrameType::HandshakeDone);
        let (ty, body) = unseal(&out[1]).unwrap();
        assert_eq!(ty, FrameType::Utf8Data);
        let plain = server_box.decrypt(body, &[ty.as_byte()]).unwrap();
        assert_eq!(Frame::decode(&plain).unwrap().text().unwrap(), "ping-me");
    }

    #[test]
    fn test_connected_once_after_handshake() {
        let mut h = harness(true);
        h.core.attach();
        assert!(drain(&mut h.events).is_empty());

        complete_handshake(&mut h);
        assert_eq!(drain(&mut h.events), vec![SessionEvent::Connected]);
        assert_eq!(*h.status.borrow(), SessionStatus::Secure);

        // A reconnect re-runs the exchange and reports Reconnected instead
        h.core.detach();
        h.core.attach();
        complete_handshake(&mut h);
        assert_eq!(
            drain(&mut h.events),
            vec![SessionEvent::Disconnected, SessionEvent::Reconnected]
        );
    }

    #[test]
    fn test_repeated_server_hello_is_fatal() {
        let mut h = harness(true);
        h.core.attach();
        let sid = Uuid::from_bytes([1; 16]);

        // Satisfy the first-frame rule, then break the order
        let server = EphemeralKeyPair::generate();
        h.core
            .on_message(&Frame::server_hello(sid, 0, server.public_key()).encode());
        h.core
            .on_message(&Frame::server_hello(sid, 1, server.public_key()).encode());

        assert_eq!(
            h.core.take_escalation(),
            Some(Escalation::Fatal(
                CloseCode::CaleHandshake,
                "Failure during CALE handshake.".into()
            ))
        );
    }

    #[test]
    fn test_wrong_first_frame_is_mismatch() {
        let mut h = harness(true);
        h.core.attach();
        h.core
            .on_message(&Frame::ping(Uuid::from_bytes([1; 16]), 0).encode());

        assert!(matches!(
            h.core.take_escalation(),
            Some(Escalation::Fatal(CloseCode::CaleMismatch, _))
        ));
        assert!(h.core.take_outbox().is_empty());
    }

    #[test]
    fn test_ping_answered_with_pong_same_ack() {
        let mut h = harness(false);
        h.core.attach();
        h.core
            .on_message(&Frame::ping(Uuid::from_bytes([9; 16]), 41).encode());

        let out = h.core.take_outbox();
        let pong = Frame::decode(&out[0]).unwrap();
        assert_eq!(pong.frame_type, FrameType::Pong);
        assert_eq!(pong.ack, 41);
        assert_eq!(pong.text().unwrap(), "pong");
    }

    #[test]
    fn test_data_acked_and_delivered() {
        let mut h = harness(false);
        h.core.attach();
        drain(&mut h.events);

        h.core
            .on_message(&Frame::binary(Uuid::from_bytes([9; 16]), 5, vec![1, 2]).encode());

        let ack = Frame::decode(&h.core.take_outbox()[0]).unwrap();
        assert_eq!(ack.frame_type, FrameType::Ack);
        assert_eq!(ack.ack, 5);
        assert_eq!(drain(&mut h.events), vec![SessionEvent::Binary(vec![1, 2])]);
    }

    #[test]
    fn test_ack_confirms_pending() {
        let mut h = harness(false);
        h.core.attach();
        h.core.send_binary(vec![7]);
        assert_eq!(h.core.pending_acks(), 1);

        let sid = Uuid::from_bytes([1; 16]);
        h.core.on_message(&Frame::ack(sid, 0).encode());
        assert_eq!(h.core.pending_acks(), 0);

        // Duplicate is harmless
        h.core.on_message(&Frame::ack(sid, 0).encode());
        assert_eq!(h.core.take_escalation(), None);
    }

    #[test]
    fn test_resend_sweep_on_reconnect() {
        let config = SessionConfig::builder("ws://cryo.test", "token")
            .use_cale(false)
            .resend_unacked_on_reconnect(true)
            .build();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (status_tx, _status_rx) = watch::channel(SessionStatus::Connecting);
        let mut core = SessionCore::new(Uuid::from_bytes([1; 16]), &config, tx, status_tx);

        core.attach();
        core.send_utf8("a".into());
        core.send_utf8("b".into());
        assert_eq!(core.take_outbox().len(), 2);

        core.detach();
        core.send_utf8("c".into());
        core.attach();

        let texts: Vec<String> = core
            .take_outbox()
            .iter()
            .map(|raw| Frame::decode(raw).unwrap().text().unwrap().to_owned())
            .collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_unsent_data_survives_reconnect() {
        let mut h = harness(false);
        h.core.attach();
        h.core.send_utf8("a".into());
        h.core.send_utf8("b".into());
        h.core.send_utf8("c".into());

        // "a" went out, "b" failed on the wire, "c" never left the outbox
        assert!(h.core.next_outbound().is_some());
        let failed = h.core.next_outbound().unwrap();
        assert_eq!(failed.ack_id, Some(1));
        h.core.unsent(failed.ack_id);

        h.core.detach();
        h.core.attach();

        let texts: Vec<String> = h
            .core
            .take_outbox()
            .iter()
            .map(|raw| Frame::decode(raw).unwrap().text().unwrap().to_owned())
            .collect();
        assert_eq!(texts, vec!["b", "c"]);
        assert_eq!(h.core.pending_acks(), 3);
    }

    #[test]
    fn test_control_frames_are_not_deferred() {
        let mut h = harness(false);
        h.core.attach();
        h.core
            .on_message(&Frame::ping(Uuid::from_bytes([9; 16]), 3).encode());

        h.core.detach();
        h.core.attach();
        assert!(h.core.take_outbox().is_empty());
    }

    #[test]
    fn test_finish_is_terminal() {
        let mut h = harness(false);
        h.core.attach();
        drain(&mut h.events);

        h.core.finish(CloseCode::Graceful, "Client finished.".into());
        h.core.finish(CloseCode::Normal, "again".into());
        h.core.send_utf8("late".into());

        assert!(h.core.is_closed());
        assert!(h.core.take_outbox().is_empty());
        assert_eq!(
            drain(&mut h.events),
            vec![SessionEvent::Closed {
                code: 4000,
                reason: "Client finished.".into()
            }]
        );
        assert_eq!(*h.status.borrow(), SessionStatus::Closed);
    }
}
