//! Recognition orchestrator.
//!
//! Turns a press-and-hold into a confirmed engagement:
//!
//! ```text
//! Idle ─press─▶ Probing ─label─▶ AwaitingConfirmation ─hold done─▶ Confirmed ─▶ Idle
//!                  │                                   any state ─cancel─▶ Idle
//!                  └─error─▶ Dismissing ─2 s─▶ Idle
//! ```
//!
//! A press on a tracked marker skips probing and uses the marker name as
//! the label. Otherwise the classifier runs while the hold timer counts;
//! the timer cannot complete until a label arrives. Every exit path hides
//! the selection box exactly once.
//!
//! While `Dismissing` no gesture is in progress, so pointer movement is
//! ignored. Only release, cancel or the dismiss timer close the box.

use std::time::{Duration, Instant};

use slynk_core::catalog::{ClipPair, VideoCatalog};
use slynk_core::gesture::{CandidateId, GestureTimer};
use slynk_core::types::AnchorId;
use slynk_core::{CoreError, ScreenPoint};
use slynk_events::UiEventKind;

use crate::tracker::{FrameTracker, TrackingBackend};

pub const ANALYZING_LABEL: &str = "Analyzing image...";
pub const BLURRY_LABEL: &str = "Image too blurry, please try again";
pub const FAILED_LABEL: &str = "Could not analyze image";

/// How long a recognition error stays on screen before the box closes.
pub const DISMISS_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    Marker { anchor_id: AnchorId },
    Classifier,
}

/// A pending user selection.
#[derive(Debug, Clone, PartialEq)]
pub struct EngagementCandidate {
    pub id: CandidateId,
    /// Marker name or classifier guess; `None` until resolved.
    pub label: Option<String>,
    pub at: ScreenPoint,
    pub started_at: Instant,
    pub progress: f64,
    pub source: CandidateSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionState {
    Idle,
    Probing,
    AwaitingConfirmation,
    /// An error is on screen and the box closes after [`DISMISS_DELAY`].
    Dismissing,
}

/// Work the runtime must carry out for the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEffect {
    Ui(UiEventKind),
    /// Capture the current frame and classify it, reporting back with `request`.
    Classify { request: CandidateId },
    /// Call [`RecognitionOrchestrator::dismiss`] with `request` after `delay`.
    ScheduleDismiss { request: CandidateId, delay: Duration },
    Confirmed {
        candidate: EngagementCandidate,
        label: String,
    },
}

pub struct RecognitionOrchestrator {
    timer: GestureTimer,
    state: RecognitionState,
    candidate: Option<EngagementCandidate>,
    box_shown: bool,
    dismiss_delay: Duration,
}

impl Default for RecognitionOrchestrator {
    fn default() -> Self {
        Self::new(GestureTimer::default(), DISMISS_DELAY)
    }
}

impl RecognitionOrchestrator {
    pub fn new(timer: GestureTimer, dismiss_delay: Duration) -> Self {
        Self {
            timer,
            state: RecognitionState::Idle,
            candidate: None,
            box_shown: false,
            dismiss_delay,
        }
    }

    pub fn state(&self) -> RecognitionState {
        self.state
    }

    pub fn candidate(&self) -> Option<&EngagementCandidate> {
        self.candidate.as_ref()
    }

    /// Whether the hold timer needs ticking.
    pub fn is_holding(&self) -> bool {
        self.timer.active_id().is_some()
    }

    /// Pointer went down at `at`.
    ///
    /// Ignored while another candidate is pending, and a silent no-op when
    /// no tracker frame exists yet.
    pub fn press(
        &mut self,
        at: ScreenPoint,
        now: Instant,
        tracker: &FrameTracker,
        backend: &dyn TrackingBackend,
    ) -> Vec<RecognitionEffect> {
        if self.candidate.is_some() {
            tracing::debug!("Press ignored, a candidate is already pending");
            return Vec::new();
        }
        if !tracker.has_frame() {
            tracing::debug!(error = %CoreError::TrackingUnavailable, "Press ignored");
            return Vec::new();
        }

        let id = self.timer.begin(at, now);
        let mut effects = Vec::new();

        match tracker.find_marker_at(at, backend) {
            Some(anchor) => {
                let label = anchor.name.clone().unwrap_or_default();
                tracing::info!(candidate = id.get(), anchor_id = %anchor.id, label = %label, "Press on tracked marker");
                self.candidate = Some(EngagementCandidate {
                    id,
                    label: Some(label.clone()),
                    at,
                    started_at: now,
                    progress: 0.0,
                    source: CandidateSource::Marker {
                        anchor_id: anchor.id,
                    },
                });
                self.state = RecognitionState::AwaitingConfirmation;
                self.show_box(at, label, &mut effects);
            }
            None => {
                tracing::info!(candidate = id.get(), "No marker under press, classifying frame");
                self.timer.set_completion_gate(id, false);
                self.candidate = Some(EngagementCandidate {
                    id,
                    label: None,
                    at,
                    started_at: now,
                    progress: 0.0,
                    source: CandidateSource::Classifier,
                });
                self.state = RecognitionState::Probing;
                self.show_box(at, ANALYZING_LABEL.to_string(), &mut effects);
                effects.push(RecognitionEffect::Classify { request: id });
            }
        }
        effects
    }

    /// Result of the focus check and classification for `request`.
    pub fn on_classified(
        &mut self,
        request: CandidateId,
        result: Result<String, CoreError>,
    ) -> Vec<RecognitionEffect> {
        if !self.is_current(request) || self.state != RecognitionState::Probing {
            tracing::debug!(candidate = request.get(), "Discarding stale classification");
            return Vec::new();
        }

        match result {
            Ok(label) => {
                tracing::info!(candidate = request.get(), label = %label, "Frame classified");
                if let Some(candidate) = self.candidate.as_mut() {
                    candidate.label = Some(label.clone());
                }
                self.state = RecognitionState::AwaitingConfirmation;
                self.timer.set_completion_gate(request, true);
                vec![RecognitionEffect::Ui(UiEventKind::BoundingBoxRelabeled { label })]
            }
            Err(CoreError::TrackingUnavailable) => self.cancel_current(),
            Err(err) => {
                tracing::warn!(candidate = request.get(), error = %err, "Recognition failed");
                let message = match err {
                    CoreError::Blurry { .. } => BLURRY_LABEL,
                    _ => FAILED_LABEL,
                };
                self.timer.cancel(request);
                self.state = RecognitionState::Dismissing;
                vec![
                    RecognitionEffect::Ui(UiEventKind::BoundingBoxRelabeled {
                        label: message.to_string(),
                    }),
                    RecognitionEffect::ScheduleDismiss {
                        request,
                        delay: self.dismiss_delay,
                    },
                ]
            }
        }
    }

    /// The error display for `request` timed out.
    pub fn dismiss(&mut self, request: CandidateId) -> Vec<RecognitionEffect> {
        if !self.is_current(request) || self.state != RecognitionState::Dismissing {
            return Vec::new();
        }
        self.cancel_current()
    }

    /// Pointer moved; cancels once it leaves the hold radius.
    pub fn pointer_moved(&mut self, to: ScreenPoint) -> Vec<RecognitionEffect> {
        let Some(id) = self.candidate.as_ref().map(|c| c.id) else {
            return Vec::new();
        };
        if self.timer.pointer_moved(id, to) {
            tracing::debug!(candidate = id.get(), "Pointer left hold radius");
            return self.cancel_current();
        }
        Vec::new()
    }

    /// Pointer released or the gesture failed.
    pub fn release(&mut self) -> Vec<RecognitionEffect> {
        self.cancel_current()
    }

    pub fn cancel(&mut self) -> Vec<RecognitionEffect> {
        self.cancel_current()
    }

    /// Advance the hold timer.
    pub fn tick(&mut self, now: Instant) -> Vec<RecognitionEffect> {
        let Some(progress) = self.timer.tick(now) else {
            return Vec::new();
        };
        let Some(candidate) = self.candidate.as_mut().filter(|c| c.id == progress.id) else {
            return Vec::new();
        };

        let mut effects = Vec::new();
        if progress.fraction != candidate.progress {
            candidate.progress = progress.fraction;
            effects.push(RecognitionEffect::Ui(UiEventKind::HoldProgress {
                fraction: progress.fraction,
            }));
        }
        effects.extend(
            progress
                .feedback()
                .into_iter()
                .map(|style| RecognitionEffect::Ui(UiEventKind::Haptic { style })),
        );

        if progress.completed {
            self.state = RecognitionState::Idle;
            let candidate = self.candidate.take();
            self.hide_box(true, &mut effects);
            if let Some(candidate) = candidate {
                match candidate.label.clone() {
                    Some(label) => {
                        tracing::info!(candidate = candidate.id.get(), label = %label, "Engagement confirmed");
                        effects.push(RecognitionEffect::Confirmed { candidate, label });
                    }
                    None => tracing::error!(candidate = candidate.id.get(), "Hold completed without a label"),
                }
            }
        }
        effects
    }

    fn is_current(&self, request: CandidateId) -> bool {
        self.candidate.as_ref().is_some_and(|c| c.id == request)
    }

    fn cancel_current(&mut self) -> Vec<RecognitionEffect> {
        let mut effects = Vec::new();
        if let Some(candidate) = self.candidate.take() {
            self.timer.cancel(candidate.id);
            tracing::debug!(candidate = candidate.id.get(), "Candidate cancelled");
        }
        self.state = RecognitionState::Idle;
        self.hide_box(false, &mut effects);
        effects
    }

    fn show_box(&mut self, at: ScreenPoint, label: String, effects: &mut Vec<RecognitionEffect>) {
        self.box_shown = true;
        effects.push(RecognitionEffect::Ui(UiEventKind::BoundingBoxShown { at, label }));
    }

    fn hide_box(&mut self, confirmed: bool, effects: &mut Vec<RecognitionEffect>) {
        if std::mem::take(&mut self.box_shown) {
            effects.push(RecognitionEffect::Ui(UiEventKind::BoundingBoxHidden { confirmed }));
        }
    }
}

/// Clips for a confirmed engagement.
///
/// Markers name their own clip pair; classifier labels are matched
/// against the catalog and use the winning entry's category.
pub fn resolve_clips(source: CandidateSource, label: &str, catalog: &VideoCatalog) -> ClipPair {
    match source {
        CandidateSource::Marker { .. } => ClipPair::for_tag(label),
        CandidateSource::Classifier => {
            let matched = catalog.best_match(label);
            tracing::debug!(
                entry = %matched.entry.name,
                score = matched.score,
                fallback = matched.fallback,
                "Resolved label to catalog entry",
            );
            ClipPair::for_tag(&matched.entry.category)
        }
    }
}
