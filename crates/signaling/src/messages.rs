//! Avatar service wire messages.
//!
//! The server speaks a mix of bare control words (`START`, `STOP`) and JSON
//! objects over the same WebSocket. This module turns each text frame into
//! a typed [`ServerMessage`] and defines the JSON bodies the client sends.

use serde::{Deserialize, Serialize};

/// Control word that forces the session open.
pub const CONTROL_START: &str = "START";

/// Control word that asks the client to tear the transport down.
pub const CONTROL_STOP: &str = "STOP";

/// Marker substring of the room-readiness message.
const ROOM_MARKER: &str = "roomID";

/// A text frame received from the avatar service.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Start,
    Stop,
    /// Room/context is ready; the raw text is kept for logging.
    RoomReady(String),
    /// Answer to our offer.
    Answer { sdp: Option<String> },
    /// Explicit `{"error": "..."}` payload.
    Error(String),
    /// Well-formed JSON that the session does not act on.
    Other(serde_json::Value),
}

/// Parse one server text frame.
///
/// Returns `Err` only for text that is neither a control word, a room
/// message, nor valid JSON.
pub fn parse_server_message(text: &str) -> Result<ServerMessage, serde_json::Error> {
    match text.trim() {
        CONTROL_START => return Ok(ServerMessage::Start),
        CONTROL_STOP => return Ok(ServerMessage::Stop),
        _ => {}
    }
    if text.contains(ROOM_MARKER) {
        return Ok(ServerMessage::RoomReady(text.to_string()));
    }

    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("type").and_then(|t| t.as_str()) == Some("answer") {
        let sdp = value
            .get("sdp")
            .and_then(|s| s.as_str())
            .map(str::to_string);
        return Ok(ServerMessage::Answer { sdp });
    }
    if let Some(error) = value.get("error").and_then(|e| e.as_str()) {
        return Ok(ServerMessage::Error(error.to_string()));
    }
    Ok(ServerMessage::Other(value))
}

/// Body of the token exchange request.
#[derive(Debug, Serialize)]
pub struct TokenRequest<'a> {
    #[serde(rename = "faceId")]
    pub face_id: &'a str,
    #[serde(rename = "isJPG")]
    pub is_jpg: bool,
    #[serde(rename = "apiKey")]
    pub api_key: &'a str,
    #[serde(rename = "syncAudio")]
    pub sync_audio: bool,
}

impl<'a> TokenRequest<'a> {
    pub fn new(face_id: &'a str, api_key: &'a str) -> Self {
        Self {
            face_id,
            is_jpg: false,
            api_key,
            sync_audio: true,
        }
    }
}

/// Body of the token exchange response: either a token or an error.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// The media offer sent once the room is ready.
#[derive(Debug, Serialize)]
pub struct OfferMessage<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub sdp: String,
    #[serde(rename = "apiKey")]
    pub api_key: &'a str,
}

impl<'a> OfferMessage<'a> {
    pub fn new(sdp: String, api_key: &'a str) -> Self {
        Self {
            kind: "offer",
            sdp,
            api_key,
        }
    }
}
