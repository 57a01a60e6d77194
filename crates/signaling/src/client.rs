//! WebSocket connect for the live avatar session.

use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Raw WebSocket stream to the avatar service.
pub type AvatarStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection settings for the session WebSocket.
#[derive(Debug, Clone)]
pub struct AvatarClient {
    ws_url: String,
}

/// A live WebSocket connection to the avatar service.
pub struct AvatarConnection {
    pub ws_url: String,
    pub ws_stream: AvatarStream,
}

impl AvatarClient {
    pub fn new(ws_url: String) -> Self {
        Self { ws_url }
    }

    /// Open the WebSocket. The session token is sent by the caller as the
    /// first frame, not as part of the URL.
    pub async fn connect(&self) -> Result<AvatarConnection, AvatarClientError> {
        let (ws_stream, _response) = connect_async(self.ws_url.as_str()).await.map_err(|e| {
            AvatarClientError::Connection(format!(
                "Failed to connect to avatar service at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::info!(ws_url = %self.ws_url, "Connected to avatar service");

        Ok(AvatarConnection {
            ws_url: self.ws_url.clone(),
            ws_stream,
        })
    }
}

/// Errors that can occur when connecting.
#[derive(Debug, thiserror::Error)]
pub enum AvatarClientError {
    #[error("Connection error: {0}")]
    Connection(String),
}
