//! Transport-free signaling state machine.
//!
//! [`SignalingSession`] never performs I/O. Each input (`on_token`,
//! `on_text`, `disconnect`, ...) returns the [`SessionAction`]s the caller
//! must carry out, in order. The async driver in
//! [`processor`](crate::processor) executes them against a real transport;
//! tests feed inputs directly.
//!
//! Once the session reaches `Closed` or `Failed` every further input is a
//! no-op, so late token results, stray frames and repeated disconnects
//! cannot fire a second completion.

use std::time::Duration;

use slynk_core::CoreError;

use crate::audio::silence_primer;
use crate::events::SignalingEvent;
use crate::messages::{parse_server_message, OfferMessage, ServerMessage};
use crate::sdp::audio_offer_sdp;

/// Connection state of one avatar session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    TokenRequested,
    TransportConnecting,
    Negotiating,
    Open,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::TokenRequested => "token_requested",
            SessionState::TransportConnecting => "transport_connecting",
            SessionState::Negotiating => "negotiating",
            SessionState::Open => "open",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        }
    }
}

/// Why a session failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SignalingError {
    #[error("token request failed: {0}")]
    Token(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// The service sent an explicit `{"error": ...}` payload.
    #[error("server error: {0}")]
    Server(String),

    #[error("an avatar session is already active")]
    AlreadyActive,
}

impl From<SignalingError> for CoreError {
    fn from(err: SignalingError) -> Self {
        match err {
            SignalingError::Token(msg) => CoreError::SignalingToken(msg),
            SignalingError::Transport(msg) => CoreError::SignalingTransport(msg),
            SignalingError::Protocol(msg) => CoreError::SignalingProtocol(msg),
            SignalingError::Server(msg) => CoreError::SignalingProtocol(format!("server: {msg}")),
            SignalingError::AlreadyActive => CoreError::ConcurrencyViolation("avatar session"),
        }
    }
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    RequestToken,
    OpenTransport { token: String },
    SendText(String),
    SendBinary(Vec<u8>),
    /// Call [`SignalingSession::on_offer_due`] after `delay`.
    ScheduleOffer { delay: Duration },
    /// Close and release the transport and any pending timers or requests.
    CloseTransport,
    Emit(SignalingEvent),
}

/// One avatar conversation channel.
#[derive(Debug)]
pub struct SignalingSession {
    api_key: String,
    offer_delay: Duration,
    state: SessionState,
    token: Option<String>,
    token_sent: bool,
    offer_scheduled: bool,
    offer_sent: bool,
    opened: bool,
}

impl SignalingSession {
    pub fn new(api_key: impl Into<String>, offer_delay: Duration) -> Self {
        Self {
            api_key: api_key.into(),
            offer_delay,
            state: SessionState::Idle,
            token: None,
            token_sent: false,
            offer_scheduled: false,
            offer_sent: false,
            opened: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Begin the handshake. Only valid from `Idle`.
    pub fn start(&mut self) -> Result<Vec<SessionAction>, SignalingError> {
        if self.state != SessionState::Idle {
            return Err(SignalingError::AlreadyActive);
        }
        let mut actions = Vec::new();
        self.transition(SessionState::TokenRequested, &mut actions);
        actions.push(SessionAction::RequestToken);
        Ok(actions)
    }

    /// Result of the token exchange.
    pub fn on_token(&mut self, result: Result<String, SignalingError>) -> Vec<SessionAction> {
        if self.state != SessionState::TokenRequested {
            tracing::debug!(state = self.state.as_str(), "Ignoring late token result");
            return Vec::new();
        }
        match result {
            Ok(token) => {
                let mut actions = Vec::new();
                self.token = Some(token.clone());
                self.transition(SessionState::TransportConnecting, &mut actions);
                actions.push(SessionAction::OpenTransport { token });
                actions
            }
            Err(err) => self.fail(err),
        }
    }

    /// The transport is connected; the token goes out first.
    pub fn on_transport_open(&mut self) -> Vec<SessionAction> {
        if self.state != SessionState::TransportConnecting || self.token_sent {
            return Vec::new();
        }
        match self.token.clone() {
            Some(token) => {
                self.token_sent = true;
                tracing::debug!("Transport open, sending session token");
                vec![SessionAction::SendText(token)]
            }
            None => self.fail(SignalingError::Protocol(
                "transport opened without a session token".into(),
            )),
        }
    }

    /// A text frame from the server.
    pub fn on_text(&mut self, text: &str) -> Vec<SessionAction> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        let message = match parse_server_message(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, raw_message = %text, "Malformed signaling message");
                return self.fail(SignalingError::Protocol(format!("malformed message: {e}")));
            }
        };

        match message {
            ServerMessage::Start => self.open(),
            ServerMessage::Stop => {
                tracing::info!("Server requested stop");
                self.close()
            }
            ServerMessage::RoomReady(raw) => self.on_room_ready(&raw),
            ServerMessage::Answer { sdp } => self.on_answer(sdp),
            ServerMessage::Error(msg) => {
                tracing::warn!(error = %msg, "Signaling server reported an error");
                self.fail(SignalingError::Server(msg))
            }
            ServerMessage::Other(value) => {
                tracing::debug!(message = %value, "Unhandled signaling message");
                Vec::new()
            }
        }
    }

    /// Binary frames from the server carry media we do not consume.
    pub fn on_binary(&mut self, len: usize) -> Vec<SessionAction> {
        tracing::trace!(len, "Ignoring binary frame from server");
        Vec::new()
    }

    /// The offer delay elapsed. `session_version` seeds the SDP origin line.
    pub fn on_offer_due(&mut self, session_version: i64) -> Vec<SessionAction> {
        if self.state != SessionState::Negotiating || self.offer_sent {
            return Vec::new();
        }
        let offer = OfferMessage::new(audio_offer_sdp(session_version), &self.api_key);
        match serde_json::to_string(&offer) {
            Ok(json) => {
                self.offer_sent = true;
                tracing::debug!("Sending audio offer");
                vec![SessionAction::SendText(json)]
            }
            Err(e) => self.fail(SignalingError::Protocol(format!("offer encoding: {e}"))),
        }
    }

    pub fn on_transport_error(&mut self, message: String) -> Vec<SessionAction> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        self.fail(SignalingError::Transport(message))
    }

    /// The server closed the transport without a `STOP`.
    pub fn on_transport_closed(&mut self) -> Vec<SessionAction> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        self.fail(SignalingError::Transport("connection closed unexpectedly".into()))
    }

    /// Close from any non-terminal state without reporting a failure.
    pub fn disconnect(&mut self) -> Vec<SessionAction> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        self.close()
    }

    /// Forward a microphone frame. Dropped unless the session is open.
    pub fn send_audio(&mut self, bytes: Vec<u8>) -> Vec<SessionAction> {
        if self.state != SessionState::Open {
            tracing::trace!(len = bytes.len(), state = self.state.as_str(), "Dropping audio frame");
            return Vec::new();
        }
        vec![SessionAction::SendBinary(bytes)]
    }

    // ---- private helpers ----

    fn on_room_ready(&mut self, raw: &str) -> Vec<SessionAction> {
        if self.state != SessionState::TransportConnecting {
            tracing::debug!(state = self.state.as_str(), "Ignoring room message");
            return Vec::new();
        }
        tracing::debug!(message = %raw, "Room ready");
        let mut actions = Vec::new();
        self.transition(SessionState::Negotiating, &mut actions);
        if !self.offer_scheduled {
            self.offer_scheduled = true;
            actions.push(SessionAction::ScheduleOffer {
                delay: self.offer_delay,
            });
        }
        actions
    }

    fn on_answer(&mut self, sdp: Option<String>) -> Vec<SessionAction> {
        if self.state != SessionState::Negotiating || !self.offer_sent {
            tracing::debug!(state = self.state.as_str(), "Ignoring unsolicited answer");
            return Vec::new();
        }
        match sdp {
            Some(_) => self.open(),
            None => self.fail(SignalingError::Protocol("answer without sdp".into())),
        }
    }

    fn open(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.state == SessionState::Open {
            return actions;
        }
        self.transition(SessionState::Open, &mut actions);
        if !self.opened {
            self.opened = true;
            actions.push(SessionAction::Emit(SignalingEvent::Opened));
        }
        actions.push(SessionAction::SendBinary(silence_primer()));
        actions
    }

    fn close(&mut self) -> Vec<SessionAction> {
        let mut actions = vec![SessionAction::CloseTransport];
        self.transition(SessionState::Closed, &mut actions);
        actions.push(SessionAction::Emit(SignalingEvent::Closed));
        actions
    }

    fn fail(&mut self, err: SignalingError) -> Vec<SessionAction> {
        tracing::warn!(error = %err, state = self.state.as_str(), "Signaling session failed");
        let mut actions = vec![SessionAction::CloseTransport];
        self.transition(SessionState::Failed, &mut actions);
        actions.push(SessionAction::Emit(SignalingEvent::Failed(err)));
        actions
    }

    fn transition(&mut self, next: SessionState, actions: &mut Vec<SessionAction>) {
        tracing::debug!(from = self.state.as_str(), to = next.as_str(), "Signaling state change");
        self.state = next;
        actions.push(SessionAction::Emit(SignalingEvent::StateChanged(next)));
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::audio::SILENCE_PRIMER_BYTES;

    const ROOM: &str = r#"{"roomID":"room-7"}"#;
    const ANSWER: &str = r#"{"type":"answer","sdp":"v=0\r\n"}"#;

    fn session() -> SignalingSession {
        SignalingSession::new("key-1", Duration::from_millis(500))
    }

    fn emitted(actions: &[SessionAction]) -> Vec<SignalingEvent> {
        actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::Emit(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    fn failures(actions: &[SessionAction]) -> usize {
        emitted(actions)
            .iter()
            .filter(|e| matches!(e, SignalingEvent::Failed(_)))
            .count()
    }

    /// Drive a session up to `Negotiating` with the offer already sent.
    fn negotiating() -> SignalingSession {
        let mut s = session();
        s.start().unwrap();
        s.on_token(Ok("tok".into()));
        s.on_transport_open();
        s.on_text(ROOM);
        s.on_offer_due(1);
        assert_eq!(s.state(), SessionState::Negotiating);
        s
    }

    fn open() -> SignalingSession {
        let mut s = negotiating();
        s.on_text(ANSWER);
        assert_eq!(s.state(), SessionState::Open);
        s
    }

    #[test]
    fn start_requests_exactly_one_token() {
        let mut s = session();
        let actions = s.start().unwrap();
        assert_eq!(
            actions.iter().filter(|a| **a == SessionAction::RequestToken).count(),
            1
        );
        assert_eq!(s.state(), SessionState::TokenRequested);
        assert_matches!(s.start(), Err(SignalingError::AlreadyActive));
    }

    #[test]
    fn token_opens_transport_and_is_sent_first_once() {
        let mut s = session();
        s.start().unwrap();
        let actions = s.on_token(Ok("tok-9".into()));
        assert!(actions.contains(&SessionAction::OpenTransport {
            token: "tok-9".into()
        }));
        assert_eq!(s.state(), SessionState::TransportConnecting);

        assert_eq!(
            s.on_transport_open(),
            vec![SessionAction::SendText("tok-9".into())]
        );
        assert!(s.on_transport_open().is_empty());
    }

    #[test]
    fn token_failure_fails_once() {
        let mut s = session();
        s.start().unwrap();
        let actions = s.on_token(Err(SignalingError::Token("401".into())));
        assert_eq!(failures(&actions), 1);
        assert_eq!(actions[0], SessionAction::CloseTransport);
        assert_eq!(s.state(), SessionState::Failed);
        assert!(s.on_transport_error("late".into()).is_empty());
    }

    #[test]
    fn room_ready_schedules_a_single_offer() {
        let mut s = session();
        s.start().unwrap();
        s.on_token(Ok("tok".into()));
        s.on_transport_open();

        let actions = s.on_text(ROOM);
        assert_eq!(s.state(), SessionState::Negotiating);
        assert!(actions.contains(&SessionAction::ScheduleOffer {
            delay: Duration::from_millis(500)
        }));
        assert!(s.on_text(ROOM).is_empty());

        let offer = s.on_offer_due(42);
        assert_matches!(&offer[..], [SessionAction::SendText(json)] => {
            let value: serde_json::Value = serde_json::from_str(json).unwrap();
            assert_eq!(value["type"], "offer");
            assert_eq!(value["apiKey"], "key-1");
            assert!(value["sdp"].as_str().unwrap().contains("o=- 42 1"));
        });
        assert!(s.on_offer_due(43).is_empty());
    }

    #[test]
    fn answer_opens_and_primes_with_silence() {
        let mut s = negotiating();
        let actions = s.on_text(ANSWER);
        assert_eq!(s.state(), SessionState::Open);
        assert!(emitted(&actions).contains(&SignalingEvent::Opened));
        assert_matches!(actions.last(), Some(SessionAction::SendBinary(b)) if b.len() == SILENCE_PRIMER_BYTES);
    }

    #[test]
    fn answer_before_offer_is_ignored() {
        let mut s = session();
        s.start().unwrap();
        s.on_token(Ok("tok".into()));
        s.on_transport_open();
        s.on_text(ROOM);
        assert!(s.on_text(ANSWER).is_empty());
        assert_eq!(s.state(), SessionState::Negotiating);
    }

    #[test]
    fn start_forces_open_and_opened_fires_once() {
        let mut s = session();
        s.start().unwrap();
        s.on_token(Ok("tok".into()));
        s.on_transport_open();

        let actions = s.on_text("START");
        assert_eq!(s.state(), SessionState::Open);
        assert_eq!(
            emitted(&actions)
                .iter()
                .filter(|e| **e == SignalingEvent::Opened)
                .count(),
            1
        );
        assert!(s.on_text("START").is_empty());
        assert!(s.on_text(ANSWER).is_empty());
    }

    #[test]
    fn stop_closes_without_failure_from_any_state() {
        let builders: Vec<fn() -> SignalingSession> = vec![
            || {
                let mut s = session();
                s.start().unwrap();
                s.on_token(Ok("tok".into()));
                s
            },
            negotiating,
            open,
        ];
        for build in builders {
            let mut s = build();
            let actions = s.on_text("STOP");
            assert_eq!(s.state(), SessionState::Closed);
            assert_eq!(failures(&actions), 0);
            assert!(actions.contains(&SessionAction::CloseTransport));
            assert_eq!(emitted(&actions).last(), Some(&SignalingEvent::Closed));
        }
    }

    #[test]
    fn transport_error_after_open_fails_exactly_once() {
        let mut s = open();
        let first = s.on_transport_error("reset by peer".into());
        let second = s.on_transport_error("again".into());
        let third = s.on_transport_closed();
        assert_eq!(failures(&first), 1);
        assert!(second.is_empty());
        assert!(third.is_empty());
        assert_eq!(s.state(), SessionState::Failed);
    }

    #[test]
    fn malformed_and_error_payloads_fail() {
        let mut s = open();
        let actions = s.on_text("not json");
        assert_matches!(
            emitted(&actions).last(),
            Some(SignalingEvent::Failed(SignalingError::Protocol(_)))
        );

        let mut s = negotiating();
        let actions = s.on_text(r#"{"error":"bad key"}"#);
        assert_matches!(
            emitted(&actions).last(),
            Some(SignalingEvent::Failed(SignalingError::Server(msg))) if msg == "bad key"
        );
    }

    #[test]
    fn disconnect_is_quiet_and_idempotent() {
        let mut s = session();
        s.start().unwrap();
        let actions = s.disconnect();
        assert_eq!(s.state(), SessionState::Closed);
        assert_eq!(failures(&actions), 0);
        assert!(s.disconnect().is_empty());
        assert!(s.on_token(Ok("late".into())).is_empty());
    }

    #[test]
    fn audio_only_flows_while_open() {
        let mut s = negotiating();
        assert!(s.send_audio(vec![1, 2]).is_empty());
        s.on_text(ANSWER);
        assert_eq!(
            s.send_audio(vec![1, 2]),
            vec![SessionAction::SendBinary(vec![1, 2])]
        );
    }

    #[test]
    fn binary_frames_are_ignored() {
        let mut s = open();
        assert!(s.on_binary(1024).is_empty());
        assert_eq!(s.state(), SessionState::Open);
    }

    #[test]
    fn errors_normalize_into_core_taxonomy() {
        assert_eq!(
            CoreError::from(SignalingError::Token("x".into())),
            CoreError::SignalingToken("x".into())
        );
        assert_matches!(
            CoreError::from(SignalingError::AlreadyActive),
            CoreError::ConcurrencyViolation(_)
        );
    }
}
