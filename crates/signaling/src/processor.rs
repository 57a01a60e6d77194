//! Async driver that runs one [`SignalingSession`] against a live transport.
//!
//! The driver owns the token request, the WebSocket halves and the offer
//! timer. Every I/O result is fed back into the state machine and the
//! resulting actions are executed in order. The loop exits once the
//! session is terminal; all transport resources are dropped with it.

use std::collections::VecDeque;
use std::future::{pending, Future};
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::api::TokenSource;
use crate::client::{AvatarClient, AvatarClientError, AvatarConnection, AvatarStream};
use crate::events::{SessionId, SessionUpdate};
use crate::session::{SessionAction, SignalingError, SignalingSession};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Commands from the session owner.
#[derive(Debug)]
pub enum SessionCommand {
    Disconnect,
    SendAudio(Vec<u8>),
}

/// Everything a session holds besides its state machine.
struct SessionIo {
    session_id: SessionId,
    tokens: Arc<dyn TokenSource>,
    client: AvatarClient,
    updates: mpsc::UnboundedSender<SessionUpdate>,
    token_request: Option<BoxFuture<Result<String, SignalingError>>>,
    connecting: Option<BoxFuture<Result<AvatarConnection, AvatarClientError>>>,
    sink: Option<SplitSink<AvatarStream, Message>>,
    source: Option<SplitStream<AvatarStream>>,
    offer_timer: Option<Pin<Box<Sleep>>>,
}

/// Run a session to completion.
///
/// Stops when the session closes or fails, when `commands` is dropped,
/// or when `cancel` fires. The last two disconnect without a failure.
pub async fn drive_session(
    mut session: SignalingSession,
    session_id: SessionId,
    tokens: Arc<dyn TokenSource>,
    client: AvatarClient,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    updates: mpsc::UnboundedSender<SessionUpdate>,
    cancel: CancellationToken,
) {
    let initial = match session.start() {
        Ok(actions) => actions,
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "Session already started");
            return;
        }
    };

    let mut io = SessionIo {
        session_id,
        tokens,
        client,
        updates,
        token_request: None,
        connecting: None,
        sink: None,
        source: None,
        offer_timer: None,
    };
    io.execute(&mut session, initial).await;

    while !session.state().is_terminal() {
        let actions = tokio::select! {
            _ = cancel.cancelled() => session.disconnect(),
            command = commands.recv() => match command {
                Some(SessionCommand::SendAudio(bytes)) => session.send_audio(bytes),
                Some(SessionCommand::Disconnect) | None => session.disconnect(),
            },
            result = poll_slot(&mut io.token_request) => {
                io.token_request = None;
                session.on_token(result)
            }
            result = poll_slot(&mut io.connecting) => {
                io.connecting = None;
                match result {
                    Ok(connection) => {
                        tracing::debug!(session_id = %io.session_id, ws_url = %connection.ws_url, "Avatar transport open");
                        let (sink, source) = connection.ws_stream.split();
                        io.sink = Some(sink);
                        io.source = Some(source);
                        session.on_transport_open()
                    }
                    Err(e) => session.on_transport_error(e.to_string()),
                }
            }
            frame = next_frame(&mut io.source) => match frame {
                Some(Ok(Message::Text(text))) => session.on_text(&text),
                Some(Ok(Message::Binary(bytes))) => session.on_binary(bytes.len()),
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(session_id = %io.session_id, ?frame, "Avatar WebSocket closed by server");
                    session.on_transport_closed()
                }
                Some(Ok(_)) => Vec::new(),
                Some(Err(e)) => {
                    tracing::error!(session_id = %io.session_id, error = %e, "WebSocket receive error");
                    session.on_transport_error(e.to_string())
                }
                None => session.on_transport_closed(),
            },
            _ = wait_timer(&mut io.offer_timer) => {
                io.offer_timer = None;
                session.on_offer_due(chrono::Utc::now().timestamp())
            }
        };
        io.execute(&mut session, actions).await;
    }

    tracing::debug!(
        session_id = %io.session_id,
        state = session.state().as_str(),
        "Signaling driver exiting"
    );
}

impl SessionIo {
    async fn execute(&mut self, session: &mut SignalingSession, actions: Vec<SessionAction>) {
        let mut queue: VecDeque<SessionAction> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                SessionAction::RequestToken => {
                    let tokens = Arc::clone(&self.tokens);
                    self.token_request = Some(Box::pin(async move { tokens.request_token().await }));
                }
                SessionAction::OpenTransport { .. } => {
                    let client = self.client.clone();
                    self.connecting = Some(Box::pin(async move { client.connect().await }));
                }
                SessionAction::SendText(text) => {
                    if let Err(e) = self.send(Message::Text(text)).await {
                        queue.extend(session.on_transport_error(e));
                    }
                }
                SessionAction::SendBinary(bytes) => {
                    if let Err(e) = self.send(Message::Binary(bytes)).await {
                        queue.extend(session.on_transport_error(e));
                    }
                }
                SessionAction::ScheduleOffer { delay } => {
                    self.offer_timer = Some(Box::pin(tokio::time::sleep(delay)));
                }
                SessionAction::CloseTransport => self.close().await,
                SessionAction::Emit(event) => {
                    let _ = self.updates.send(SessionUpdate {
                        session_id: self.session_id,
                        event,
                    });
                }
            }
        }
    }

    async fn send(&mut self, message: Message) -> Result<(), String> {
        match self.sink.as_mut() {
            Some(sink) => sink.send(message).await.map_err(|e| e.to_string()),
            None => Err("transport not connected".to_string()),
        }
    }

    async fn close(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            let _ = sink.send(Message::Close(None)).await;
        }
        self.source = None;
        self.token_request = None;
        self.connecting = None;
        self.offer_timer = None;
    }
}

async fn poll_slot<T>(slot: &mut Option<BoxFuture<T>>) -> T {
    match slot {
        Some(fut) => fut.await,
        None => pending().await,
    }
}

async fn next_frame(
    source: &mut Option<SplitStream<AvatarStream>>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match source {
        Some(stream) => stream.next().await,
        None => pending().await,
    }
}

async fn wait_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}
