//! End-to-end tests for the engagement runtime.
//!
//! Runs the real runtime on paused tokio time against the simulated
//! tracking, media and classifier backends and checks the UI events it
//! publishes.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use slynk_core::catalog::{ClipPair, VideoCatalog};
use slynk_core::types::{FeedbackStyle, PlaybackEndReason, PlaybackStage};
use slynk_core::{AnchorRef, CameraPose, PhysicalSize, ScreenPoint, TrackerEvent, Vec3};
use slynk_engine::recognition::{ANALYZING_LABEL, BLURRY_LABEL};
use slynk_engine::runtime::RuntimeSettings;
use slynk_engine::sim::{blurry_frame, FixedLabelClassifier, SimulatedMedia, SimulatedTracking};
use slynk_engine::{EngagementRuntime, RuntimeEvent, RuntimeHandle, RuntimeParts};
use slynk_events::{EventBus, UiEvent, UiEventKind};
use slynk_signaling::api::TokenSource;
use slynk_signaling::{AvatarConfig, SessionUpdate, SignalingError, SignalingManager};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const CLIP: Duration = Duration::from_secs(1);
const LONG_CLIP: Duration = Duration::from_secs(60);
const MARKER_AT: ScreenPoint = ScreenPoint { x: 100.0, y: 100.0 };

struct Harness {
    handle: RuntimeHandle,
    events: broadcast::Receiver<UiEvent>,
    tracking: Arc<SimulatedTracking>,
    media: Arc<SimulatedMedia>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Harness {
    fn start(tracking: SimulatedTracking, media: SimulatedMedia, classifier: FixedLabelClassifier) -> Self {
        Self::build(tracking, media, classifier, None)
    }

    fn build(
        tracking: SimulatedTracking,
        media: SimulatedMedia,
        classifier: FixedLabelClassifier,
        avatar: Option<(SignalingManager, mpsc::UnboundedReceiver<SessionUpdate>)>,
    ) -> Self {
        let avatar_on_engagement = avatar.is_some();
        let tracking = Arc::new(tracking);
        let media = Arc::new(media);
        let bus = Arc::new(EventBus::default());
        let events = bus.subscribe();

        let (runtime, handle) = EngagementRuntime::new(RuntimeParts {
            tracking: tracking.clone(),
            classifier: Arc::new(classifier),
            media: media.clone(),
            catalog: VideoCatalog::reference(),
            bus,
            avatar,
            settings: RuntimeSettings {
                avatar_on_engagement,
                ..RuntimeSettings::default()
            },
        });
        let cancel = CancellationToken::new();
        let task = tokio::spawn(runtime.run(cancel.clone()));

        Self {
            handle,
            events,
            tracking,
            media,
            cancel,
            task,
        }
    }

    fn with_media(media: SimulatedMedia) -> Self {
        Self::start(SimulatedTracking::new(), media, FixedLabelClassifier::new("unused"))
    }

    fn send(&self, event: RuntimeEvent) {
        assert!(self.handle.send(event), "runtime stopped early");
    }

    fn frame(&self) {
        self.send(RuntimeEvent::Tracker(TrackerEvent::FrameUpdated {
            camera: CameraPose {
                position: Vec3::new(0.0, 0.0, 0.0),
                forward: Vec3::new(0.0, 0.0, -1.0),
            },
        }));
    }

    fn add_marker(&self, name: &str) -> AnchorRef {
        let anchor = AnchorRef::marker(
            Uuid::new_v4(),
            name,
            PhysicalSize::new(0.2, 0.3),
            Vec3::new(MARKER_AT.x as f32, MARKER_AT.y as f32, -1.0),
        );
        self.frame();
        self.send(RuntimeEvent::Tracker(TrackerEvent::AnchorAdded {
            anchor: anchor.clone(),
        }));
        anchor
    }

    fn set_tracked(&self, anchor: &AnchorRef, tracked: bool) {
        let mut anchor = anchor.clone();
        anchor.tracked = tracked;
        self.send(RuntimeEvent::Tracker(TrackerEvent::AnchorUpdated { anchor }));
    }

    fn press(&self, at: ScreenPoint) {
        self.send(RuntimeEvent::PointerDown { at });
    }

    async fn next(&mut self) -> (Instant, UiEventKind) {
        let event = tokio::time::timeout(Duration::from_secs(120), self.events.recv())
            .await
            .expect("timed out waiting for a UI event")
            .expect("event bus closed");
        (Instant::now(), event.kind)
    }

    /// Collect events up to and including the first one matching `done`.
    async fn collect_until(&mut self, done: impl Fn(&UiEventKind) -> bool) -> Vec<(Instant, UiEventKind)> {
        let mut seen = Vec::new();
        loop {
            let (at, kind) = self.next().await;
            let finished = done(&kind);
            seen.push((at, kind));
            if finished {
                return seen;
            }
        }
    }

    async fn wait_for_stage(&mut self, stage: PlaybackStage) -> Instant {
        let seen = self
            .collect_until(|e| matches!(e, UiEventKind::PlaybackStageChanged { stage: s, .. } if *s == stage))
            .await;
        seen.last().map(|(at, _)| *at).unwrap()
    }

    async fn stop(self) {
        self.handle.shutdown();
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("runtime did not stop")
            .unwrap();
    }
}

fn kinds(seen: &[(Instant, UiEventKind)]) -> Vec<&UiEventKind> {
    seen.iter().map(|(_, kind)| kind).collect()
}

fn time_of(seen: &[(Instant, UiEventKind)], pred: impl Fn(&UiEventKind) -> bool) -> Instant {
    seen.iter()
        .find(|(_, kind)| pred(kind))
        .map(|(at, _)| *at)
        .expect("event not observed")
}

// ---------------------------------------------------------------------------
// Marker engagement
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn marker_hold_confirms_plays_both_stages_and_resets_tracking() {
    let mut h = Harness::with_media(SimulatedMedia::new(CLIP));
    let marker = h.add_marker("X");

    let t0 = Instant::now();
    h.press(MARKER_AT);
    let seen = h.collect_until(|e| matches!(e, UiEventKind::TrackingReset)).await;
    let events = kinds(&seen);

    assert_matches!(events[0], UiEventKind::BoundingBoxShown { label, .. } if label == "X");

    let confirmed_at = time_of(&seen, |e| matches!(e, UiEventKind::EngagementConfirmed { .. }));
    let held = confirmed_at - t0;
    assert!(held >= Duration::from_secs(2), "confirmed early after {held:?}");
    assert!(held <= Duration::from_millis(2100), "confirmed late after {held:?}");

    let confirmation = events
        .iter()
        .find(|e| matches!(e, UiEventKind::EngagementConfirmed { .. }))
        .unwrap();
    assert_eq!(
        *confirmation,
        &UiEventKind::EngagementConfirmed {
            label: "X".into(),
            anchor_id: Some(marker.id),
            clips: ClipPair::for_tag("X"),
        }
    );

    let haptics: Vec<FeedbackStyle> = events
        .iter()
        .filter_map(|e| match e {
            UiEventKind::Haptic { style } => Some(*style),
            _ => None,
        })
        .collect();
    assert_eq!(
        haptics,
        vec![
            FeedbackStyle::Light,
            FeedbackStyle::Medium,
            FeedbackStyle::Medium,
            FeedbackStyle::Heavy,
        ]
    );

    let hidden: Vec<bool> = events
        .iter()
        .filter_map(|e| match e {
            UiEventKind::BoundingBoxHidden { confirmed } => Some(*confirmed),
            _ => None,
        })
        .collect();
    assert_eq!(hidden, vec![true]);

    let stages: Vec<(PlaybackStage, &str)> = events
        .iter()
        .filter_map(|e| match e {
            UiEventKind::PlaybackStageChanged { stage, clip, .. } => Some((*stage, clip.as_str())),
            _ => None,
        })
        .collect();
    assert_eq!(stages, vec![(PlaybackStage::Stage1, "X_1"), (PlaybackStage::Stage2, "X_2")]);

    let stage1_at = time_of(&seen, |e| {
        matches!(e, UiEventKind::PlaybackStageChanged { stage: PlaybackStage::Stage1, .. })
    });
    let stage2_at = time_of(&seen, |e| {
        matches!(e, UiEventKind::PlaybackStageChanged { stage: PlaybackStage::Stage2, .. })
    });
    assert_eq!(stage2_at - stage1_at, CLIP);

    assert!(events.contains(&&UiEventKind::PlaybackEnded {
        anchor_id: marker.id,
        reason: PlaybackEndReason::Completed,
    }));
    assert_eq!(h.tracking.reset_count(), 1);
    assert_eq!(h.tracking.reconfigure_count(), 1);
    assert_eq!(h.media.loaded_count(), 0);

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn early_release_cancels_without_engagement() {
    let mut h = Harness::with_media(SimulatedMedia::new(CLIP));
    h.add_marker("X");

    h.press(MARKER_AT);
    tokio::time::sleep(Duration::from_millis(1200)).await;
    h.send(RuntimeEvent::PointerUp);

    let seen = h.collect_until(|e| matches!(e, UiEventKind::BoundingBoxHidden { .. })).await;
    assert_matches!(seen.last(), Some((_, UiEventKind::BoundingBoxHidden { confirmed: false })));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_matches!(h.events.try_recv(), Err(broadcast::error::TryRecvError::Empty));

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn pointer_drift_late_in_hold_cancels_without_playback() {
    let mut h = Harness::with_media(SimulatedMedia::new(CLIP));
    h.add_marker("X");

    h.press(MARKER_AT);
    tokio::time::sleep(Duration::from_millis(1000)).await;
    h.send(RuntimeEvent::PointerMoved {
        to: ScreenPoint::new(120.0, 120.0),
    });
    tokio::time::sleep(Duration::from_millis(600)).await;
    h.send(RuntimeEvent::PointerMoved {
        to: ScreenPoint::new(160.0, 160.0),
    });

    let seen = h.collect_until(|e| matches!(e, UiEventKind::BoundingBoxHidden { .. })).await;
    assert_matches!(seen.last(), Some((_, UiEventKind::BoundingBoxHidden { confirmed: false })));
    assert!(!kinds(&seen).iter().any(|e| matches!(
        e,
        UiEventKind::EngagementConfirmed { .. } | UiEventKind::PlaybackStageChanged { .. }
    )));

    // Holding still past the dwell time must not revive the gesture.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_matches!(h.events.try_recv(), Err(broadcast::error::TryRecvError::Empty));
    assert_eq!(h.media.loaded_count(), 0);

    h.stop().await;
}

// ---------------------------------------------------------------------------
// Visibility watchdog
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn hidden_marker_stops_playback_after_grace() {
    let mut h = Harness::with_media(SimulatedMedia::new(LONG_CLIP));
    let marker = h.add_marker("X");
    h.press(MARKER_AT);
    h.wait_for_stage(PlaybackStage::Stage1).await;

    let hidden_at = Instant::now();
    h.set_tracked(&marker, false);

    let seen = h.collect_until(|e| matches!(e, UiEventKind::TrackingReset)).await;
    let ended_at = time_of(&seen, |e| matches!(e, UiEventKind::PlaybackEnded { .. }));
    let absent = ended_at - hidden_at;
    assert!(absent > Duration::from_secs(3), "stopped after only {absent:?}");
    assert!(absent <= Duration::from_secs(4), "stopped late after {absent:?}");

    let events = kinds(&seen);
    let ended = events
        .iter()
        .position(|e| matches!(e, UiEventKind::PlaybackEnded { reason: PlaybackEndReason::OutOfFrame, .. }))
        .expect("out-of-frame end");
    assert_eq!(
        events[ended + 1],
        &UiEventKind::Haptic {
            style: FeedbackStyle::Medium
        }
    );
    assert_eq!(h.media.loaded_count(), 0);

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn marker_regained_within_grace_keeps_playing() {
    let mut h = Harness::with_media(SimulatedMedia::new(LONG_CLIP));
    let marker = h.add_marker("X");
    h.press(MARKER_AT);
    h.wait_for_stage(PlaybackStage::Stage1).await;

    h.set_tracked(&marker, false);
    tokio::time::sleep(Duration::from_secs(2)).await;
    h.set_tracked(&marker, true);
    tokio::time::sleep(Duration::from_secs(3)).await;

    h.send(RuntimeEvent::StopPlayback);
    let seen = h.collect_until(|e| matches!(e, UiEventKind::PlaybackEnded { .. })).await;
    assert_matches!(
        seen.last(),
        Some((_, UiEventKind::PlaybackEnded { reason: PlaybackEndReason::Cancelled, .. }))
    );

    h.stop().await;
}

// ---------------------------------------------------------------------------
// Concurrency and failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn second_engagement_is_rejected_while_playing() {
    let mut h = Harness::with_media(SimulatedMedia::new(LONG_CLIP));
    h.add_marker("X");
    h.press(MARKER_AT);
    h.wait_for_stage(PlaybackStage::Stage1).await;
    h.send(RuntimeEvent::PointerUp);

    h.press(MARKER_AT);
    h.collect_until(|e| matches!(e, UiEventKind::BoundingBoxHidden { confirmed: true }))
        .await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    h.send(RuntimeEvent::StopPlayback);

    let seen = h.collect_until(|e| matches!(e, UiEventKind::PlaybackEnded { .. })).await;
    let events = kinds(&seen);
    assert!(!events
        .iter()
        .any(|e| matches!(e, UiEventKind::EngagementConfirmed { .. } | UiEventKind::PlaybackStageChanged { .. })));
    assert_matches!(
        events.last(),
        Some(UiEventKind::PlaybackEnded { reason: PlaybackEndReason::Cancelled, .. })
    );

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn missing_clip_aborts_without_partial_state() {
    let mut h = Harness::with_media(SimulatedMedia::new(CLIP).with_clips(["X_1"]));
    h.add_marker("X");

    h.press(MARKER_AT);
    h.collect_until(|e| matches!(e, UiEventKind::EngagementConfirmed { .. })).await;
    h.send(RuntimeEvent::PointerUp);
    tokio::time::sleep(Duration::from_secs(1)).await;

    // The sequencer is idle again, so a new engagement is accepted.
    h.press(MARKER_AT);
    let seen = h
        .collect_until(|e| matches!(e, UiEventKind::EngagementConfirmed { .. }))
        .await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(!kinds(&seen)
        .iter()
        .any(|e| matches!(e, UiEventKind::PlaybackStageChanged { .. })));
    assert_matches!(h.events.try_recv(), Err(broadcast::error::TryRecvError::Empty));
    assert_eq!(h.media.loaded_count(), 0);

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn lost_tracking_session_stops_playback_and_resets() {
    let mut h = Harness::with_media(SimulatedMedia::new(LONG_CLIP));
    let marker = h.add_marker("X");
    h.press(MARKER_AT);
    h.wait_for_stage(PlaybackStage::Stage1).await;

    h.send(RuntimeEvent::Tracker(TrackerEvent::SessionLost));
    let seen = h.collect_until(|e| matches!(e, UiEventKind::TrackingReset)).await;
    assert!(kinds(&seen).contains(&&UiEventKind::PlaybackEnded {
        anchor_id: marker.id,
        reason: PlaybackEndReason::TrackingLost,
    }));
    assert_eq!(h.tracking.reset_count(), 1);

    h.stop().await;
}

// ---------------------------------------------------------------------------
// Classifier engagement
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn classified_frame_places_anchor_and_plays_catalog_clips() {
    let mut h = Harness::start(
        SimulatedTracking::new(),
        SimulatedMedia::new(CLIP),
        FixedLabelClassifier::new("basketball, lakers, person"),
    );
    h.frame();

    let at = ScreenPoint::new(400.0, 300.0);
    h.press(at);
    let seen = h
        .collect_until(|e| matches!(e, UiEventKind::PlaybackStageChanged { .. }))
        .await;
    let events = kinds(&seen);

    assert_eq!(
        events[0],
        &UiEventKind::BoundingBoxShown {
            at,
            label: ANALYZING_LABEL.into()
        }
    );
    assert_eq!(
        events[1],
        &UiEventKind::BoundingBoxRelabeled {
            label: "basketball, lakers, person".into()
        }
    );
    let anchor_id = events
        .iter()
        .find_map(|e| match e {
            UiEventKind::EngagementConfirmed { clips, anchor_id, .. } => {
                assert_eq!(clips, &ClipPair::for_tag("lebron"));
                *anchor_id
            }
            _ => None,
        })
        .expect("freeform anchor");
    assert_matches!(
        events.last(),
        Some(UiEventKind::PlaybackStageChanged { anchor_id: id, stage: PlaybackStage::Stage1, clip })
            if *id == anchor_id && clip == "lebron_1"
    );

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn blurry_frame_shows_message_then_dismisses() {
    let mut h = Harness::start(
        SimulatedTracking::with_frame(blurry_frame()),
        SimulatedMedia::new(CLIP),
        FixedLabelClassifier::new("never used"),
    );
    h.frame();

    h.press(ScreenPoint::new(400.0, 300.0));
    let seen = h.collect_until(|e| matches!(e, UiEventKind::BoundingBoxHidden { .. })).await;
    let relabeled_at = time_of(&seen, |e| {
        matches!(e, UiEventKind::BoundingBoxRelabeled { label } if label == BLURRY_LABEL)
    });
    let (hidden_at, last) = seen.last().unwrap();
    assert_eq!(last, &UiEventKind::BoundingBoxHidden { confirmed: false });
    assert_eq!(*hidden_at - relabeled_at, Duration::from_secs(2));
    assert!(!kinds(&seen)
        .iter()
        .any(|e| matches!(e, UiEventKind::EngagementConfirmed { .. })));

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_the_runtime_mid_playback() {
    let mut h = Harness::with_media(SimulatedMedia::new(LONG_CLIP));
    h.add_marker("X");
    h.press(MARKER_AT);
    h.wait_for_stage(PlaybackStage::Stage1).await;

    h.cancel.cancel();
    tokio::time::timeout(Duration::from_secs(10), h.task)
        .await
        .expect("runtime did not stop")
        .unwrap();
    assert_eq!(h.media.loaded_count(), 0);
}

// ---------------------------------------------------------------------------
// Avatar hand-off
// ---------------------------------------------------------------------------

struct RejectingTokens;

#[async_trait]
impl TokenSource for RejectingTokens {
    async fn request_token(&self) -> Result<String, SignalingError> {
        Err(SignalingError::Token("invalid api key".into()))
    }
}

#[tokio::test(start_paused = true)]
async fn engagement_starts_avatar_and_surfaces_its_failure() {
    let avatar = SignalingManager::with_token_source(AvatarConfig::new("test-key"), Arc::new(RejectingTokens));
    let mut h = Harness::build(
        SimulatedTracking::new(),
        SimulatedMedia::new(LONG_CLIP),
        FixedLabelClassifier::new("unused"),
        Some(avatar),
    );
    h.add_marker("X");
    h.press(MARKER_AT);

    let seen = h.collect_until(|e| matches!(e, UiEventKind::Notice { .. })).await;
    let states: Vec<&str> = seen
        .iter()
        .filter_map(|(_, e)| match e {
            UiEventKind::AvatarState { state } => Some(state.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(states, vec!["token_requested", "failed"]);
    assert_matches!(
        seen.last(),
        Some((_, UiEventKind::Notice { message })) if message.contains("invalid api key")
    );
    assert!(kinds(&seen)
        .iter()
        .any(|e| matches!(e, UiEventKind::EngagementConfirmed { .. })));

    h.stop().await;
}
