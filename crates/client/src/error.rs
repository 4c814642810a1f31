// crates/client/src/error.rs
use std::path::PathBuf;

use proposal_stream_core::ProtocolError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::socket::ConnectionState;

/// Errors from the token store and the refresh endpoint.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No refresh token stored")]
    NoRefreshToken,

    #[error("Token refresh rejected with status {status}")]
    Rejected { status: u16 },

    #[error("Token refresh request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("IO error on token store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed token store {path}: {message}")]
    Malformed { path: PathBuf, message: String },
}

impl AuthError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors loading or interpreting [`crate::ClientConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("No config directory for the credentials file; set PROPOSAL_TOKEN_FILE")]
    NoTokenFile,
}

/// Terminal failures of one streaming HTTP request.
///
/// The display strings are shown to users verbatim.
#[derive(Debug, Error)]
pub enum StreamError {
    /// No usable token and the refresh failed.
    #[error("Session expired. Please log in again.")]
    SessionExpired,

    /// 403 persisted after the single refresh-and-retry.
    #[error("Failed to refresh session.")]
    RefreshFailed,

    #[error("HTTP error {status}: {status_text}")]
    Status { status: u16, status_text: String },

    #[error("Request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("Failed to read response stream: {0}")]
    Body(#[source] reqwest::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The caller cancelled the request. Not reported as a failure.
    #[error("Request cancelled")]
    Cancelled,
}

/// Errors from the WebSocket session client.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("WebSocket not initialized")]
    NotInitialized,

    #[error("WebSocket not connected")]
    NotConnected,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("WebSocket connection failed: {0}")]
    Connect(#[source] tungstenite::Error),

    #[error("WebSocket transport error: {0}")]
    Transport(#[source] tungstenite::Error),

    #[error("Failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Timed out waiting for WebSocket to become {0:?}")]
    Timeout(ConnectionState),
}
