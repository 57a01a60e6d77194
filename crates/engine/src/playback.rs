//! Two-stage clip sequencing bound to one anchor.
//!
//! States: `Idle → Loading → Stage1 → Stage2 → Idle`. Stage 2 only starts
//! when stage 1 reports end of media; stage 2's end is the only
//! successful way back to `Idle`. Stops and watchdog expiry tear down the
//! same way. At most one session exists at a time.

use std::sync::Arc;
use std::time::Instant;

use slynk_core::catalog::ClipPair;
use slynk_core::types::{AnchorId, Generation, PlaybackEndReason, PlaybackStage};
use slynk_core::{AnchorRef, CoreError};

use crate::media::{EndOfMedia, LoadedClips, MediaBackend, MediaHandle, OverlayHandle};

/// The active two-clip overlay.
#[derive(Debug)]
pub struct PlaybackSession {
    pub anchor: AnchorRef,
    pub clips: ClipPair,
    pub stage: PlaybackStage,
    /// Refreshed by the visibility watchdog.
    pub last_visible: Instant,
    overlay: OverlayHandle,
    media: LoadedClips,
}

impl PlaybackSession {
    pub fn anchor_id(&self) -> AnchorId {
        self.anchor.id
    }

    fn current_media(&self) -> Option<MediaHandle> {
        match self.stage {
            PlaybackStage::Stage1 => Some(self.media.stage1),
            PlaybackStage::Stage2 => Some(self.media.stage2),
            PlaybackStage::Idle => None,
        }
    }
}

#[derive(Debug)]
enum SequencerState {
    Idle,
    /// Reserved; clips are loading in the background.
    Loading {
        generation: Generation,
        anchor: AnchorRef,
        clips: ClipPair,
    },
    Playing(PlaybackSession),
}

/// Returned by [`PlaybackSequencer::begin`]; identifies the load to run.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackTicket {
    pub generation: Generation,
    pub clips: ClipPair,
}

/// What the runtime must report or wait on after a sequencer call.
#[derive(Debug)]
pub enum PlaybackOutput {
    StageStarted {
        anchor_id: AnchorId,
        stage: PlaybackStage,
        clip: String,
        media: MediaHandle,
        ended: EndOfMedia,
    },
    Ended {
        anchor_id: AnchorId,
        reason: PlaybackEndReason,
    },
}

pub struct PlaybackSequencer {
    media: Arc<dyn MediaBackend>,
    state: SequencerState,
    generation: Generation,
}

impl PlaybackSequencer {
    pub fn new(media: Arc<dyn MediaBackend>) -> Self {
        Self {
            media,
            state: SequencerState::Idle,
            generation: 0,
        }
    }

    pub fn media(&self) -> &Arc<dyn MediaBackend> {
        &self.media
    }

    /// Whether a session is loading or playing.
    pub fn is_active(&self) -> bool {
        !matches!(self.state, SequencerState::Idle)
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.state, SequencerState::Playing(_))
    }

    pub fn session(&self) -> Option<&PlaybackSession> {
        match &self.state {
            SequencerState::Playing(session) => Some(session),
            _ => None,
        }
    }

    pub fn session_mut(&mut self) -> Option<&mut PlaybackSession> {
        match &mut self.state {
            SequencerState::Playing(session) => Some(session),
            _ => None,
        }
    }

    pub fn stage(&self) -> PlaybackStage {
        self.session().map_or(PlaybackStage::Idle, |s| s.stage)
    }

    /// Reserve the sequencer for `anchor`. Rejected while another session
    /// is loading or playing; the active session is left untouched.
    pub fn begin(&mut self, anchor: &AnchorRef, clips: ClipPair) -> Result<PlaybackTicket, CoreError> {
        if self.is_active() {
            tracing::warn!(anchor_id = %anchor.id, "Playback already active, rejecting");
            return Err(CoreError::ConcurrencyViolation("playback session"));
        }
        self.generation += 1;
        tracing::info!(
            anchor_id = %anchor.id,
            stage1 = %clips.stage1,
            stage2 = %clips.stage2,
            generation = self.generation,
            "Loading clips for playback",
        );
        self.state = SequencerState::Loading {
            generation: self.generation,
            anchor: anchor.clone(),
            clips: clips.clone(),
        };
        Ok(PlaybackTicket {
            generation: self.generation,
            clips,
        })
    }

    /// Both clips finished loading (or failed). Attaches the overlay and
    /// starts stage 1 from position zero.
    ///
    /// Results for a superseded load are released and ignored.
    pub fn on_clips_loaded(
        &mut self,
        generation: Generation,
        result: Result<LoadedClips, CoreError>,
        now: Instant,
    ) -> Result<Option<PlaybackOutput>, CoreError> {
        let is_current = matches!(
            &self.state,
            SequencerState::Loading { generation: g, .. } if *g == generation
        );
        if !is_current {
            tracing::debug!(generation, "Discarding stale clip load");
            if let Ok(loaded) = result {
                self.release(loaded);
            }
            return Ok(None);
        }

        let SequencerState::Loading { anchor, clips, .. } =
            std::mem::replace(&mut self.state, SequencerState::Idle)
        else {
            return Ok(None);
        };

        let loaded = result?;
        let overlay = match self.media.attach(&anchor, loaded.stage1) {
            Ok(overlay) => overlay,
            Err(e) => {
                self.release(loaded);
                return Err(e);
            }
        };

        self.media.seek_to_start(loaded.stage1);
        let ended = self.media.play(loaded.stage1);
        let output = PlaybackOutput::StageStarted {
            anchor_id: anchor.id,
            stage: PlaybackStage::Stage1,
            clip: clips.stage1.clone(),
            media: loaded.stage1,
            ended,
        };
        tracing::info!(anchor_id = %anchor.id, clip = %clips.stage1, "Stage 1 playing");
        self.state = SequencerState::Playing(PlaybackSession {
            anchor,
            clips,
            stage: PlaybackStage::Stage1,
            last_visible: now,
            overlay,
            media: loaded,
        });
        Ok(Some(output))
    }

    /// End of media for `media`. Stage 1 advances to stage 2; stage 2
    /// tears the session down. Notifications for anything but the current
    /// stage's clip are ignored.
    pub fn on_media_ended(&mut self, media: MediaHandle) -> Option<PlaybackOutput> {
        let session = self.session_mut()?;
        if session.current_media() != Some(media) {
            tracing::debug!(media = media.0, "Ignoring stale end-of-media");
            return None;
        }

        let stage = session.stage;
        match stage {
            PlaybackStage::Stage1 => {
                let next = session.media.stage2;
                let overlay = session.overlay;
                session.stage = PlaybackStage::Stage2;
                let anchor_id = session.anchor.id;
                let clip = session.clips.stage2.clone();

                self.media.swap(overlay, next);
                self.media.seek_to_start(next);
                let ended = self.media.play(next);
                tracing::info!(anchor_id = %anchor_id, clip = %clip, "Stage 2 playing");
                Some(PlaybackOutput::StageStarted {
                    anchor_id,
                    stage: PlaybackStage::Stage2,
                    clip,
                    media: next,
                    ended,
                })
            }
            PlaybackStage::Stage2 => self.teardown(PlaybackEndReason::Completed),
            PlaybackStage::Idle => None,
        }
    }

    /// Stop whatever is active. A pending load is abandoned; a playing
    /// session is torn down and reported.
    pub fn stop(&mut self, reason: PlaybackEndReason) -> Option<PlaybackOutput> {
        match &self.state {
            SequencerState::Idle => None,
            SequencerState::Loading { generation, .. } => {
                tracing::info!(generation, ?reason, "Abandoning clip load");
                self.state = SequencerState::Idle;
                None
            }
            SequencerState::Playing(_) => self.teardown(reason),
        }
    }

    fn teardown(&mut self, reason: PlaybackEndReason) -> Option<PlaybackOutput> {
        let SequencerState::Playing(session) =
            std::mem::replace(&mut self.state, SequencerState::Idle)
        else {
            return None;
        };

        if let Some(current) = session.current_media() {
            self.media.pause(current);
        }
        self.media.detach(session.overlay);
        self.release(session.media);

        tracing::info!(anchor_id = %session.anchor.id, ?reason, "Playback torn down");
        Some(PlaybackOutput::Ended {
            anchor_id: session.anchor.id,
            reason,
        })
    }

    fn release(&self, loaded: LoadedClips) {
        self.media.release(loaded.stage1);
        self.media.release(loaded.stage2);
    }
}
