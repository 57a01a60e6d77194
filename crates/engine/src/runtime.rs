//! The engagement runtime.
//!
//! One task owns the tracker mirror, the recognition orchestrator, the
//! playback sequencer and the avatar session manager. Everything that
//! happens elsewhere (tracker frames, pointer input, classifier results,
//! media completion, signaling updates) arrives as a typed event on a
//! channel and is applied here in order, so none of the state machines
//! needs a lock.
//!
//! Background work (classification, clip loading, end-of-media waits,
//! delayed dismissals) runs on spawned tasks tied to one
//! [`CancellationToken`]; their results come back as internal events and
//! are dropped by the state machines when stale.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use slynk_core::catalog::VideoCatalog;
use slynk_core::gesture::{CandidateId, HOLD_TICK_INTERVAL};
use slynk_core::types::{FeedbackStyle, Generation, PlaybackEndReason, PlaybackStage};
use slynk_core::{AnchorRef, CoreError, PhysicalSize, ScreenPoint, TrackerEvent};
use slynk_events::{EventBus, UiEventKind};
use slynk_signaling::{SessionUpdate, SignalingEvent, SignalingManager};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::classifier::{analyze_frame, Classifier};
use crate::media::{load_clips, LoadedClips, MediaBackend, MediaHandle};
use crate::playback::{PlaybackOutput, PlaybackSequencer, PlaybackTicket};
use crate::recognition::{
    resolve_clips, CandidateSource, EngagementCandidate, RecognitionEffect, RecognitionOrchestrator,
};
use crate::tracker::{FrameTracker, TrackingBackend};
use crate::watchdog::{VisibilityWatchdog, WatchdogVerdict, WATCHDOG_INTERVAL};

/// Upper bound on one focus check plus classification.
pub const CLASSIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between clearing tracked anchors and reconfiguring the session.
pub const TRACKING_RESET_DELAY: Duration = Duration::from_millis(500);

/// Plane size for anchors placed from a classifier engagement.
pub const FREEFORM_ANCHOR_SIZE: PhysicalSize = PhysicalSize::new(0.5, 0.5);

/// Input accepted by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    Tracker(TrackerEvent),
    PointerDown { at: ScreenPoint },
    PointerMoved { to: ScreenPoint },
    PointerUp,
    /// The platform cancelled the touch (e.g. an incoming call).
    CancelGesture,
    StopPlayback,
    StartAvatar,
    StopAvatar,
    /// Encoded PCM for the open avatar session.
    AvatarAudio(Vec<u8>),
    Shutdown,
}

/// Results of background tasks, fed back into the loop.
#[derive(Debug)]
enum Internal {
    Classified {
        request: CandidateId,
        result: Result<String, CoreError>,
    },
    DismissDue {
        request: CandidateId,
    },
    ClipsLoaded {
        generation: Generation,
        result: Result<LoadedClips, CoreError>,
    },
    MediaEnded {
        media: MediaHandle,
    },
    ReconfigureDue {
        generation: Generation,
    },
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub classify_timeout: Duration,
    pub tracking_reset_delay: Duration,
    pub freeform_anchor_size: PhysicalSize,
    /// Start an avatar session whenever an engagement is confirmed.
    pub avatar_on_engagement: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            classify_timeout: CLASSIFY_TIMEOUT,
            tracking_reset_delay: TRACKING_RESET_DELAY,
            freeform_anchor_size: FREEFORM_ANCHOR_SIZE,
            avatar_on_engagement: false,
        }
    }
}

/// Collaborators the runtime is built from.
pub struct RuntimeParts {
    pub tracking: Arc<dyn TrackingBackend>,
    pub classifier: Arc<dyn Classifier>,
    pub media: Arc<dyn MediaBackend>,
    pub catalog: VideoCatalog,
    pub bus: Arc<EventBus>,
    /// The avatar manager and the receiving end of its updates.
    pub avatar: Option<(SignalingManager, mpsc::UnboundedReceiver<SessionUpdate>)>,
    pub settings: RuntimeSettings,
}

/// Cloneable sender side of the runtime's input channel.
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    tx: mpsc::UnboundedSender<RuntimeEvent>,
}

impl RuntimeHandle {
    /// Queue an event. Returns `false` once the runtime has stopped.
    pub fn send(&self, event: RuntimeEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(RuntimeEvent::Shutdown);
    }
}

pub struct EngagementRuntime {
    events: mpsc::UnboundedReceiver<RuntimeEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    tracking: Arc<dyn TrackingBackend>,
    classifier: Arc<dyn Classifier>,
    catalog: VideoCatalog,
    bus: Arc<EventBus>,
    avatar: Option<SignalingManager>,
    avatar_updates: Option<mpsc::UnboundedReceiver<SessionUpdate>>,
    settings: RuntimeSettings,
    tracker: FrameTracker,
    recognition: RecognitionOrchestrator,
    playback: PlaybackSequencer,
    watchdog: VisibilityWatchdog,
    /// Bumped on every tracking reset; stale reconfigure timers compare against it.
    reset_generation: Generation,
    restart_hold_ticker: bool,
    restart_watchdog_ticker: bool,
    /// Parent of every spawned background task.
    tasks: CancellationToken,
}

/// Time source shared with tokio's clock so paused-time tests stay consistent.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn next_avatar_update(
    updates: &mut Option<mpsc::UnboundedReceiver<SessionUpdate>>,
) -> Option<SessionUpdate> {
    match updates {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl EngagementRuntime {
    pub fn new(parts: RuntimeParts) -> (Self, RuntimeHandle) {
        let (tx, events) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (avatar, avatar_updates) = match parts.avatar {
            Some((manager, updates)) => (Some(manager), Some(updates)),
            None => (None, None),
        };

        let runtime = Self {
            events,
            internal_tx,
            internal_rx,
            tracking: parts.tracking,
            classifier: parts.classifier,
            catalog: parts.catalog,
            bus: parts.bus,
            avatar,
            avatar_updates,
            settings: parts.settings,
            tracker: FrameTracker::new(),
            recognition: RecognitionOrchestrator::default(),
            playback: PlaybackSequencer::new(parts.media),
            watchdog: VisibilityWatchdog::default(),
            reset_generation: 0,
            restart_hold_ticker: false,
            restart_watchdog_ticker: false,
            tasks: CancellationToken::new(),
        };
        (runtime, RuntimeHandle { tx })
    }

    /// Run until [`RuntimeEvent::Shutdown`], every handle is dropped, or
    /// `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut hold_ticker = tokio::time::interval(HOLD_TICK_INTERVAL);
        hold_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut watchdog_ticker = tokio::time::interval(WATCHDOG_INTERVAL);
        watchdog_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            avatar = self.avatar.is_some(),
            catalog_entries = self.catalog.entries().len(),
            "Engagement runtime started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Engagement runtime cancelled");
                    break;
                }
                event = self.events.recv() => match event {
                    Some(RuntimeEvent::Shutdown) | None => break,
                    Some(event) => self.handle_event(event),
                },
                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal),
                Some(update) = next_avatar_update(&mut self.avatar_updates) => {
                    self.handle_avatar_update(update);
                }
                _ = hold_ticker.tick(), if self.recognition.is_holding() => {
                    let effects = self.recognition.tick(now());
                    self.apply_recognition(effects);
                }
                _ = watchdog_ticker.tick(), if self.playback.is_playing() => {
                    self.check_visibility(now());
                }
            }

            if std::mem::take(&mut self.restart_hold_ticker) {
                hold_ticker.reset();
            }
            if std::mem::take(&mut self.restart_watchdog_ticker) {
                watchdog_ticker.reset();
            }
        }

        if let Some(output) = self.playback.stop(PlaybackEndReason::Cancelled) {
            self.on_playback_output(output);
        }
        self.tasks.cancel();
        if let Some(avatar) = self.avatar.as_mut() {
            avatar.shutdown().await;
        }
        tracing::info!("Engagement runtime stopped");
    }

    // -----------------------------------------------------------------------
    // Input
    // -----------------------------------------------------------------------

    fn handle_event(&mut self, event: RuntimeEvent) {
        match event {
            RuntimeEvent::Tracker(TrackerEvent::SessionLost) => self.on_tracking_lost(),
            RuntimeEvent::Tracker(event) => self.tracker.apply(event),
            RuntimeEvent::PointerDown { at } => {
                let effects =
                    self.recognition.press(at, now(), &self.tracker, self.tracking.as_ref());
                if !effects.is_empty() {
                    self.restart_hold_ticker = true;
                }
                self.apply_recognition(effects);
            }
            RuntimeEvent::PointerMoved { to } => {
                let effects = self.recognition.pointer_moved(to);
                self.apply_recognition(effects);
            }
            RuntimeEvent::PointerUp => {
                let effects = self.recognition.release();
                self.apply_recognition(effects);
            }
            RuntimeEvent::CancelGesture => {
                let effects = self.recognition.cancel();
                self.apply_recognition(effects);
            }
            RuntimeEvent::StopPlayback => {
                if let Some(output) = self.playback.stop(PlaybackEndReason::Cancelled) {
                    self.on_playback_output(output);
                }
            }
            RuntimeEvent::StartAvatar => self.start_avatar(),
            RuntimeEvent::StopAvatar => {
                if let Some(avatar) = &self.avatar {
                    avatar.disconnect();
                }
            }
            RuntimeEvent::AvatarAudio(bytes) => match &self.avatar {
                Some(avatar) => avatar.send_audio(bytes),
                None => tracing::debug!(bytes = bytes.len(), "Audio dropped, no avatar configured"),
            },
            RuntimeEvent::Shutdown => {}
        }
    }

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Classified { request, result } => {
                let effects = self.recognition.on_classified(request, result);
                self.apply_recognition(effects);
            }
            Internal::DismissDue { request } => {
                let effects = self.recognition.dismiss(request);
                self.apply_recognition(effects);
            }
            Internal::ClipsLoaded { generation, result } => {
                match self.playback.on_clips_loaded(generation, result, now()) {
                    Ok(Some(output)) => self.on_playback_output(output),
                    Ok(None) => {}
                    Err(e) => tracing::error!(error = %e, "Playback aborted"),
                }
            }
            Internal::MediaEnded { media } => {
                if let Some(output) = self.playback.on_media_ended(media) {
                    self.on_playback_output(output);
                }
            }
            Internal::ReconfigureDue { generation } => {
                if generation == self.reset_generation {
                    self.tracking.reconfigure();
                    self.bus.publish(UiEventKind::TrackingReset);
                    tracing::info!("Tracking session reconfigured");
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Recognition
    // -----------------------------------------------------------------------

    fn apply_recognition(&mut self, effects: Vec<RecognitionEffect>) {
        for effect in effects {
            match effect {
                RecognitionEffect::Ui(kind) => self.bus.publish(kind),
                RecognitionEffect::Classify { request } => self.start_classification(request),
                RecognitionEffect::ScheduleDismiss { request, delay } => {
                    self.schedule(delay, Internal::DismissDue { request });
                }
                RecognitionEffect::Confirmed { candidate, label } => {
                    self.on_confirmed(candidate, label);
                }
            }
        }
    }

    fn start_classification(&mut self, request: CandidateId) {
        let Some(frame) = self.tracking.capture_frame() else {
            let effects = self
                .recognition
                .on_classified(request, Err(CoreError::TrackingUnavailable));
            self.apply_recognition(effects);
            return;
        };

        let classifier = Arc::clone(&self.classifier);
        let limit = self.settings.classify_timeout;
        self.spawn_internal(async move {
            let analysis = analyze_frame(classifier.as_ref(), &frame);
            let result = match tokio::time::timeout(limit, analysis).await {
                Ok(result) => result,
                Err(_) => Err(CoreError::RecognitionTimeout),
            };
            Some(Internal::Classified { request, result })
        });
    }

    fn on_confirmed(&mut self, candidate: EngagementCandidate, label: String) {
        if self.playback.is_active() {
            tracing::warn!(
                error = %CoreError::ConcurrencyViolation("playback session"),
                label = %label,
                "Engagement rejected",
            );
            return;
        }

        let anchor = match candidate.source {
            CandidateSource::Marker { anchor_id } => match self.tracker.anchor(anchor_id) {
                Some(anchor) => anchor.clone(),
                None => {
                    tracing::warn!(error = %CoreError::AnchorNotFound(anchor_id), "Engagement dropped");
                    return;
                }
            },
            CandidateSource::Classifier => match self.place_freeform_anchor(candidate.at) {
                Some(anchor) => anchor,
                None => {
                    tracing::debug!(error = %CoreError::TrackingUnavailable, "No surface under engagement");
                    return;
                }
            },
        };

        let clips = resolve_clips(candidate.source, &label, &self.catalog);
        tracing::info!(
            anchor_id = %anchor.id,
            label = %label,
            stage1 = %clips.stage1,
            stage2 = %clips.stage2,
            "Engagement confirmed",
        );
        self.bus.publish(UiEventKind::EngagementConfirmed {
            label,
            anchor_id: Some(anchor.id),
            clips: clips.clone(),
        });

        match self.playback.begin(&anchor, clips) {
            Ok(ticket) => self.load_clips(ticket),
            Err(e) => tracing::warn!(error = %e, "Playback not started"),
        }

        if self.settings.avatar_on_engagement {
            self.start_avatar();
        }
    }

    fn place_freeform_anchor(&mut self, at: ScreenPoint) -> Option<AnchorRef> {
        let position = self.tracking.hit_test(at)?;
        let anchor = AnchorRef::freeform(Uuid::new_v4(), self.settings.freeform_anchor_size, position);
        self.tracker.upsert(anchor.clone());
        Some(anchor)
    }

    // -----------------------------------------------------------------------
    // Playback
    // -----------------------------------------------------------------------

    fn load_clips(&self, ticket: PlaybackTicket) {
        let media = Arc::clone(self.playback.media());
        self.spawn_internal(async move {
            let result = load_clips(media.as_ref(), &ticket.clips).await;
            Some(Internal::ClipsLoaded {
                generation: ticket.generation,
                result,
            })
        });
    }

    fn on_playback_output(&mut self, output: PlaybackOutput) {
        match output {
            PlaybackOutput::StageStarted {
                anchor_id,
                stage,
                clip,
                media,
                ended,
            } => {
                tracing::debug!(anchor_id = %anchor_id, stage = ?stage, clip = %clip, "Playback stage started");
                if stage == PlaybackStage::Stage1 {
                    self.restart_watchdog_ticker = true;
                }
                self.bus.publish(UiEventKind::PlaybackStageChanged {
                    anchor_id,
                    stage,
                    clip,
                });
                // A dropped sender means the clip was paused or released.
                self.spawn_internal(async move {
                    ended.await.ok().map(|()| Internal::MediaEnded { media })
                });
            }
            PlaybackOutput::Ended { anchor_id, reason } => {
                tracing::info!(anchor_id = %anchor_id, reason = ?reason, "Playback ended");
                self.bus.publish(UiEventKind::PlaybackEnded { anchor_id, reason });
                if reason == PlaybackEndReason::OutOfFrame {
                    self.bus.publish(UiEventKind::Haptic {
                        style: FeedbackStyle::Medium,
                    });
                }
                self.reset_tracking();
            }
        }
    }

    fn check_visibility(&mut self, now: Instant) {
        let Some(session) = self.playback.session_mut() else {
            return;
        };
        let anchor_id = session.anchor_id();
        let visible = self.tracker.is_anchor_visible(anchor_id);

        match self.watchdog.check(&mut session.last_visible, visible, now) {
            WatchdogVerdict::Visible => {}
            WatchdogVerdict::Hidden { elapsed } => {
                tracing::debug!(
                    anchor_id = %anchor_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Anchor out of view",
                );
            }
            WatchdogVerdict::Expired { elapsed } => {
                tracing::info!(
                    anchor_id = %anchor_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Anchor out of view too long, stopping playback",
                );
                if let Some(output) = self.playback.stop(PlaybackEndReason::OutOfFrame) {
                    self.on_playback_output(output);
                }
            }
        }
    }

    /// Clear every tracked anchor now and reconfigure the session after
    /// the reset delay.
    fn reset_tracking(&mut self) {
        self.tracking.reset_anchors();
        self.tracker.clear_anchors();
        self.reset_generation += 1;
        self.schedule(
            self.settings.tracking_reset_delay,
            Internal::ReconfigureDue {
                generation: self.reset_generation,
            },
        );
    }

    fn on_tracking_lost(&mut self) {
        tracing::warn!("Tracking session lost, resetting");
        self.tracker.apply(TrackerEvent::SessionLost);
        let effects = self.recognition.cancel();
        self.apply_recognition(effects);
        match self.playback.stop(PlaybackEndReason::TrackingLost) {
            Some(output) => self.on_playback_output(output),
            None => self.reset_tracking(),
        }
    }

    // -----------------------------------------------------------------------
    // Avatar
    // -----------------------------------------------------------------------

    fn start_avatar(&mut self) {
        let Some(avatar) = self.avatar.as_mut() else {
            tracing::debug!("Avatar hand-off not configured");
            return;
        };
        match avatar.start() {
            Ok(session_id) => tracing::info!(session_id = %session_id, "Avatar session requested"),
            Err(e) => tracing::debug!(error = %CoreError::from(e), "Avatar session not started"),
        }
    }

    fn handle_avatar_update(&mut self, update: SessionUpdate) {
        if let Some(avatar) = self.avatar.as_mut() {
            avatar.observe(&update);
        }
        let session_id = update.session_id;
        match update.event {
            SignalingEvent::StateChanged(state) => {
                self.bus.publish(UiEventKind::AvatarState {
                    state: state.as_str().to_string(),
                });
            }
            SignalingEvent::Opened => tracing::info!(session_id = %session_id, "Avatar session open"),
            SignalingEvent::Failed(err) => {
                let err = CoreError::from(err);
                tracing::warn!(session_id = %session_id, error = %err, "Avatar session failed");
                if err.is_user_visible() {
                    self.bus.publish(UiEventKind::Notice {
                        message: err.to_string(),
                    });
                }
            }
            SignalingEvent::Closed => tracing::info!(session_id = %session_id, "Avatar session closed"),
        }
    }

    // -----------------------------------------------------------------------
    // Background tasks
    // -----------------------------------------------------------------------

    fn spawn_internal<F>(&self, work: F)
    where
        F: Future<Output = Option<Internal>> + Send + 'static,
    {
        let tx = self.internal_tx.clone();
        let cancel = self.tasks.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                output = work => {
                    if let Some(event) = output {
                        let _ = tx.send(event);
                    }
                }
            }
        });
    }

    fn schedule(&self, delay: Duration, event: Internal) {
        self.spawn_internal(async move {
            tokio::time::sleep(delay).await;
            Some(event)
        });
    }
}
