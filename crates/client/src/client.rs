//! WebSocket client for a scan's push channel.
//!
//! [`ScanStreamClient`] holds the WebSocket base URL of the backend. Call
//! [`ScanStreamClient::connect`] to open the receive-only channel for one
//! scan at `{ws_url}/ws/scans/{scan_id}`.

use std::time::Duration;

use scanwatch_core::types::DbId;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// The raw stream type returned by [`ScanStreamClient::connect`].
pub type ScanStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for the backend's push channels.
#[derive(Debug, Clone)]
pub struct ScanStreamClient {
    ws_url: String,
}

/// A live push-channel connection for one scan.
pub struct ScanStreamConnection {
    pub scan_id: DbId,
    pub ws_stream: ScanStream,
}

impl ScanStreamClient {
    /// * `ws_url` - WebSocket base URL, e.g. `ws://host:8080`.
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// WebSocket base URL (without trailing slash).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Full channel URL for a scan.
    pub fn scan_url(&self, scan_id: DbId) -> String {
        format!("{}/ws/scans/{}", self.ws_url, scan_id)
    }

    /// Open the push channel for `scan_id`.
    pub async fn connect(&self, scan_id: DbId) -> Result<ScanStreamConnection, StreamError> {
        let url = self.scan_url(scan_id);

        let (ws_stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| StreamError::Connection(format!("Failed to connect to {url}: {e}")))?;

        tracing::info!(scan_id, url = %url, "Connected to scan push channel");

        Ok(ScanStreamConnection { scan_id, ws_stream })
    }
}

/// Errors on a scan's push channel. Never fatal to the view.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A transport or protocol error on an established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Nothing arrived within the first-message window.
    #[error("No message received within {}s of connecting", .0.as_secs())]
    FirstMessageTimeout(Duration),

    /// The channel went quiet for longer than the idle limit.
    #[error("No message received for {}s", .0.as_secs())]
    IdleTimeout(Duration),
}
