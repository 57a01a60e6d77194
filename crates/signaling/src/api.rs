//! HTTPS token exchange with the avatar service.

use async_trait::async_trait;

use crate::config::AvatarConfig;
use crate::messages::{TokenRequest, TokenResponse};
use crate::session::SignalingError;

/// Anything that can mint a session token.
///
/// The driver only depends on this trait so tests and the replay host can
/// substitute their own source.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn request_token(&self) -> Result<String, SignalingError>;
}

/// HTTP client for the token endpoint.
pub struct AvatarApi {
    client: reqwest::Client,
    token_url: String,
    face_id: String,
    api_key: String,
}

/// Errors from the token exchange.
#[derive(Debug, thiserror::Error)]
pub enum AvatarApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Avatar API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    /// The service answered with an `error` field.
    #[error("Token request rejected: {0}")]
    Rejected(String),

    #[error("Invalid token response: {0}")]
    InvalidResponse(String),
}

impl AvatarApi {
    pub fn new(config: &AvatarConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling.
    pub fn with_client(client: reqwest::Client, config: &AvatarConfig) -> Self {
        Self {
            client,
            token_url: config.token_url.clone(),
            face_id: config.face_id.clone(),
            api_key: config.api_key.clone(),
        }
    }

    /// Exchange the API key for a time-bounded session token.
    pub async fn start_session(&self) -> Result<String, AvatarApiError> {
        let body = TokenRequest::new(&self.face_id, &self.api_key);

        let response = self
            .client
            .post(&self.token_url)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(AvatarApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TokenResponse = response.json().await?;
        match (parsed.session_token, parsed.error) {
            (_, Some(error)) => Err(AvatarApiError::Rejected(error)),
            (Some(token), None) if !token.is_empty() => {
                tracing::debug!(face_id = %self.face_id, "Avatar session token acquired");
                Ok(token)
            }
            _ => Err(AvatarApiError::InvalidResponse(
                "missing session_token".to_string(),
            )),
        }
    }
}

#[async_trait]
impl TokenSource for AvatarApi {
    async fn request_token(&self) -> Result<String, SignalingError> {
        self.start_session()
            .await
            .map_err(|e| SignalingError::Token(e.to_string()))
    }
}
