//! Replay scripts.
//!
//! One JSON object per line: `{"at_ms": 2000, "event": {"type": "pointer_up"}}`.
//! Offsets are measured from the start of the replay and must not go
//! backwards. Blank lines and lines starting with `#` are skipped.

use std::path::Path;

use serde::Deserialize;
use slynk_core::{AnchorRef, CameraPose, PhysicalSize, ScreenPoint, TrackerEvent, Vec3};
use slynk_engine::RuntimeEvent;
use slynk_signaling::audio::{encode_pcm, PcmBuffer};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Failed to read script: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Line {line}: at_ms {at_ms} is earlier than the previous line")]
    OutOfOrder { line: usize, at_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptLine {
    pub at_ms: u64,
    pub event: ScriptEvent,
}

/// Script vocabulary. Tracker and pointer events map one-to-one onto
/// [`RuntimeEvent`]s; `marker` is shorthand for a tracked marker anchor.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptEvent {
    /// Camera at the origin looking down -z.
    Frame,
    Marker {
        id: Uuid,
        name: String,
        x: f32,
        y: f32,
        #[serde(default = "default_depth")]
        z: f32,
        #[serde(default = "default_size")]
        width: f32,
        #[serde(default = "default_size")]
        height: f32,
        #[serde(default = "default_tracked")]
        tracked: bool,
    },
    Tracker {
        event: TrackerEvent,
    },
    PointerDown {
        x: f64,
        y: f64,
    },
    PointerMove {
        x: f64,
        y: f64,
    },
    PointerUp,
    CancelGesture,
    StopPlayback,
    StartAvatar,
    StopAvatar,
    /// Float PCM samples for the avatar session.
    Audio {
        samples: Vec<f32>,
    },
    /// Keeps the replay running until `at_ms` without sending anything.
    Wait,
}

fn default_depth() -> f32 {
    -1.0
}

fn default_size() -> f32 {
    0.3
}

fn default_tracked() -> bool {
    true
}

impl ScriptEvent {
    /// The runtime events this line expands to.
    pub fn into_runtime_events(self) -> Vec<RuntimeEvent> {
        match self {
            ScriptEvent::Frame => vec![RuntimeEvent::Tracker(TrackerEvent::FrameUpdated {
                camera: CameraPose {
                    position: Vec3::new(0.0, 0.0, 0.0),
                    forward: Vec3::new(0.0, 0.0, -1.0),
                },
            })],
            ScriptEvent::Marker {
                id,
                name,
                x,
                y,
                z,
                width,
                height,
                tracked,
            } => {
                let mut anchor =
                    AnchorRef::marker(id, name, PhysicalSize::new(width, height), Vec3::new(x, y, z));
                anchor.tracked = tracked;
                // The tracker mirror treats an update for an unknown id as an add.
                vec![RuntimeEvent::Tracker(TrackerEvent::AnchorUpdated { anchor })]
            }
            ScriptEvent::Tracker { event } => vec![RuntimeEvent::Tracker(event)],
            ScriptEvent::PointerDown { x, y } => vec![RuntimeEvent::PointerDown {
                at: ScreenPoint::new(x, y),
            }],
            ScriptEvent::PointerMove { x, y } => vec![RuntimeEvent::PointerMoved {
                to: ScreenPoint::new(x, y),
            }],
            ScriptEvent::PointerUp => vec![RuntimeEvent::PointerUp],
            ScriptEvent::CancelGesture => vec![RuntimeEvent::CancelGesture],
            ScriptEvent::StopPlayback => vec![RuntimeEvent::StopPlayback],
            ScriptEvent::StartAvatar => vec![RuntimeEvent::StartAvatar],
            ScriptEvent::StopAvatar => vec![RuntimeEvent::StopAvatar],
            ScriptEvent::Audio { samples } => {
                vec![RuntimeEvent::AvatarAudio(encode_pcm(PcmBuffer::F32(&samples)))]
            }
            ScriptEvent::Wait => Vec::new(),
        }
    }
}

/// Parse a whole script.
pub fn parse_script(text: &str) -> Result<Vec<ScriptLine>, ScriptError> {
    let mut lines = Vec::new();
    let mut last_at = 0;
    for (index, raw) in text.lines().enumerate() {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with('#') {
            continue;
        }
        let line = index + 1;
        let parsed: ScriptLine =
            serde_json::from_str(raw).map_err(|source| ScriptError::Parse { line, source })?;
        if parsed.at_ms < last_at {
            return Err(ScriptError::OutOfOrder {
                line,
                at_ms: parsed.at_ms,
            });
        }
        last_at = parsed.at_ms;
        lines.push(parsed);
    }
    Ok(lines)
}

pub fn load_script(path: &Path) -> Result<Vec<ScriptLine>, ScriptError> {
    parse_script(&std::fs::read_to_string(path)?)
}
