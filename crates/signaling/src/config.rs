use std::time::Duration;

/// Default token exchange endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://api.simli.ai/startAudioToVideoSession";

/// Default live-session WebSocket endpoint.
pub const DEFAULT_WS_URL: &str = "wss://api.simli.ai/startWebRTCSession";

/// Default avatar face.
pub const DEFAULT_FACE_ID: &str = "tmp9i8bbq7c";

/// Delay between the room-ready message and sending the offer, so the
/// server finishes its own setup first.
pub const DEFAULT_OFFER_DELAY: Duration = Duration::from_millis(500);

/// Connection settings for the avatar service.
#[derive(Debug, Clone)]
pub struct AvatarConfig {
    pub api_key: String,
    pub face_id: String,
    pub token_url: String,
    pub ws_url: String,
    pub offer_delay: Duration,
}

impl AvatarConfig {
    /// Settings for the public service endpoints.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            face_id: DEFAULT_FACE_ID.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            offer_delay: DEFAULT_OFFER_DELAY,
        }
    }
}
