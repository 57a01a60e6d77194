use std::path::PathBuf;
use std::time::Duration;

use slynk_signaling::config::{DEFAULT_FACE_ID, DEFAULT_TOKEN_URL, DEFAULT_WS_URL};
use slynk_signaling::AvatarConfig;

/// Log output format selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got '{value}'")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Application configuration loaded from environment variables.
///
/// All fields have defaults suitable for a local replay. The avatar
/// hand-off stays disabled until an API key is provided.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Avatar service API key (default: empty, avatar disabled).
    pub api_key: String,
    pub face_id: String,
    pub token_url: String,
    pub ws_url: String,
    /// Start an avatar session on every confirmed engagement.
    pub avatar_on_engagement: bool,
    /// Catalog file; the built-in reference catalog when unset.
    pub catalog_path: Option<PathBuf>,
    /// How long each simulated clip plays.
    pub clip_duration: Duration,
    pub log_format: LogFormat,
}

impl AppConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                                         |
    /// |------------------------|-------------------------------------------------|
    /// | `SIMLI_API_KEY`        | empty                                           |
    /// | `SIMLI_FACE_ID`        | `tmp9i8bbq7c`                                   |
    /// | `SIMLI_TOKEN_URL`      | `https://api.simli.ai/startAudioToVideoSession` |
    /// | `SIMLI_WS_URL`         | `wss://api.simli.ai/startWebRTCSession`         |
    /// | `AVATAR_ON_ENGAGEMENT` | `false`                                         |
    /// | `VIDEO_CATALOG_PATH`   | unset                                           |
    /// | `CLIP_DURATION_MS`     | `3000`                                          |
    /// | `LOG_FORMAT`           | `text`                                          |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let avatar_on_engagement = match var("AVATAR_ON_ENGAGEMENT", "false").trim() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" | "" => false,
            other => {
                return Err(ConfigError::Invalid {
                    name: "AVATAR_ON_ENGAGEMENT",
                    expected: "a boolean",
                    value: other.to_string(),
                })
            }
        };

        let clip_ms = var("CLIP_DURATION_MS", "3000");
        let clip_duration = clip_ms
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::Invalid {
                name: "CLIP_DURATION_MS",
                expected: "a whole number of milliseconds",
                value: clip_ms.clone(),
            })?;

        let log_format = match var("LOG_FORMAT", "text").trim().to_ascii_lowercase().as_str() {
            "text" | "" => LogFormat::Text,
            "json" => LogFormat::Json,
            other => {
                return Err(ConfigError::Invalid {
                    name: "LOG_FORMAT",
                    expected: "'text' or 'json'",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            api_key: var("SIMLI_API_KEY", "").trim().to_string(),
            face_id: var("SIMLI_FACE_ID", DEFAULT_FACE_ID),
            token_url: var("SIMLI_TOKEN_URL", DEFAULT_TOKEN_URL),
            ws_url: var("SIMLI_WS_URL", DEFAULT_WS_URL),
            avatar_on_engagement,
            catalog_path: lookup("VIDEO_CATALOG_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            clip_duration,
            log_format,
        })
    }

    /// Avatar settings, or `None` when no API key is configured.
    pub fn avatar(&self) -> Option<AvatarConfig> {
        if self.api_key.is_empty() {
            return None;
        }
        let mut config = AvatarConfig::new(self.api_key.clone());
        config.face_id = self.face_id.clone();
        config.token_url = self.token_url.clone();
        config.ws_url = self.ws_url.clone();
        Some(config)
    }
}
