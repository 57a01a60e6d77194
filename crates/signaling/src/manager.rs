//! Single-session avatar manager.
//!
//! [`SignalingManager`] spawns at most one session driver at a time and
//! relays every [`SessionUpdate`] on one unbounded channel. The owner
//! calls [`observe`](SignalingManager::observe) with each update so the
//! slot frees once the session reaches `Closed` or `Failed`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::{AvatarApi, TokenSource};
use crate::client::AvatarClient;
use crate::config::AvatarConfig;
use crate::events::{SessionId, SessionUpdate};
use crate::processor::{drive_session, SessionCommand};
use crate::session::{SignalingError, SignalingSession};

/// How long [`SignalingManager::shutdown`] waits for the driver to exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct SignalingManager {
    config: AvatarConfig,
    tokens: Arc<dyn TokenSource>,
    updates_tx: mpsc::UnboundedSender<SessionUpdate>,
    active: Option<ActiveSession>,
    next_id: u64,
    /// Master cancellation token; each driver gets a child.
    cancel: CancellationToken,
}

/// Bookkeeping for the running driver.
struct ActiveSession {
    id: SessionId,
    commands: mpsc::UnboundedSender<SessionCommand>,
    task_handle: tokio::task::JoinHandle<()>,
}

impl SignalingManager {
    /// Create a manager that fetches tokens from the configured endpoint.
    ///
    /// Returns the receiving end of the update channel.
    pub fn new(config: AvatarConfig) -> (Self, mpsc::UnboundedReceiver<SessionUpdate>) {
        let tokens: Arc<dyn TokenSource> = Arc::new(AvatarApi::new(&config));
        Self::with_token_source(config, tokens)
    }

    pub fn with_token_source(
        config: AvatarConfig,
        tokens: Arc<dyn TokenSource>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionUpdate>) {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let manager = Self {
            config,
            tokens,
            updates_tx,
            active: None,
            next_id: 1,
            cancel: CancellationToken::new(),
        };
        (manager, updates_rx)
    }

    /// Start a new session. Rejected while another one is still running.
    pub fn start(&mut self) -> Result<SessionId, SignalingError> {
        if let Some(active) = &self.active {
            tracing::warn!(session_id = %active.id, "Avatar session already active");
            return Err(SignalingError::AlreadyActive);
        }

        let id = SessionId(self.next_id);
        self.next_id += 1;

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let session = SignalingSession::new(self.config.api_key.clone(), self.config.offer_delay);
        let task_handle = tokio::spawn(drive_session(
            session,
            id,
            Arc::clone(&self.tokens),
            AvatarClient::new(self.config.ws_url.clone()),
            commands_rx,
            self.updates_tx.clone(),
            self.cancel.child_token(),
        ));

        tracing::info!(session_id = %id, face_id = %self.config.face_id, "Avatar session started");
        self.active = Some(ActiveSession {
            id,
            commands,
            task_handle,
        });
        Ok(id)
    }

    /// Ask the running session to close. It reports `Closed` when done.
    pub fn disconnect(&self) {
        if let Some(active) = &self.active {
            tracing::info!(session_id = %active.id, "Disconnecting avatar session");
            let _ = active.commands.send(SessionCommand::Disconnect);
        }
    }

    /// Forward a microphone frame; the session drops it unless open.
    pub fn send_audio(&self, bytes: Vec<u8>) {
        if let Some(active) = &self.active {
            let _ = active.commands.send(SessionCommand::SendAudio(bytes));
        }
    }

    pub fn active_id(&self) -> Option<SessionId> {
        self.active.as_ref().map(|a| a.id)
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Feed back an update read from the channel; frees the slot on a
    /// terminal event for the running session.
    pub fn observe(&mut self, update: &SessionUpdate) {
        let is_current = self.active_id() == Some(update.session_id);
        if is_current && update.event.is_terminal() {
            tracing::debug!(session_id = %update.session_id, "Avatar session finished");
            self.active = None;
        }
    }

    /// Cancel the running driver and wait briefly for it to exit.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(active) = self.active.take() {
            tracing::info!(session_id = %active.id, "Stopping avatar session task");
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, active.task_handle).await;
        }
    }
}
