// crates/client/src/config.rs
//! Client configuration: defaults, an optional TOML file, then env overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use proposal_stream_core::DEFAULT_MAX_LINE_LEN;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Directory name under the platform config dir.
const APP_DIR: &str = "proposal-stream";
const CREDENTIALS_FILE: &str = "credentials.json";

pub const ENV_API_URL: &str = "PROPOSAL_API_URL";
pub const ENV_WS_URL: &str = "PROPOSAL_WS_URL";
pub const ENV_TOKEN_FILE: &str = "PROPOSAL_TOKEN_FILE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base for streaming endpoints, e.g. `https://host/api`.
    pub api_base_url: String,
    /// Chat playground socket, e.g. `wss://host/ws/playground`.
    pub ws_url: String,
    /// Token refresh endpoint, relative to `api_base_url`.
    pub refresh_path: String,
    /// Credentials file. `None` = `<config_dir>/proposal-stream/credentials.json`.
    pub token_file: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    /// Fixed pause between teardown and reconnect in `SocketClient::reconnect`.
    pub reconnect_delay_ms: u64,
    /// Upper bound on waiting for the server's close frame.
    pub close_timeout_ms: u64,
    /// Longest partial NDJSON line held while waiting for its newline.
    pub max_line_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api".into(),
            ws_url: "ws://localhost:8000/ws/playground".into(),
            refresh_path: "auth/refresh".into(),
            token_file: None,
            connect_timeout_secs: 10,
            reconnect_delay_ms: 500,
            close_timeout_ms: 2000,
            max_line_bytes: DEFAULT_MAX_LINE_LEN,
        }
    }
}

impl ClientConfig {
    /// Defaults, then `path` if given, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = get(ENV_API_URL) {
            self.api_base_url = url;
        }
        if let Some(url) = get(ENV_WS_URL) {
            self.ws_url = url;
        }
        if let Some(path) = get(ENV_TOKEN_FILE) {
            self.token_file = Some(PathBuf::from(path));
        }
    }

    /// `<api_base_url>/<endpoint>`, tolerant of slashes on either side.
    pub fn endpoint_url(&self, endpoint: &str) -> Result<Url, ConfigError> {
        let joined = format!(
            "{}/{}",
            self.api_base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        parse_url(&joined)
    }

    pub fn refresh_url(&self) -> Result<Url, ConfigError> {
        self.endpoint_url(&self.refresh_path)
    }

    /// Socket URL bound to one (user, thread) pair. An empty thread id asks
    /// the server to start a new thread.
    pub fn socket_url(&self, user_id: &str, thread_id: &str) -> Result<Url, ConfigError> {
        let mut url = parse_url(&self.ws_url)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("user_id", user_id);
            if !thread_id.is_empty() {
                query.append_pair("thread_id", thread_id);
            }
        }
        Ok(url)
    }

    pub fn token_file_path(&self) -> Option<PathBuf> {
        self.token_file
            .clone()
            .or_else(|| dirs::config_dir().map(|d| d.join(APP_DIR).join(CREDENTIALS_FILE)))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

fn parse_url(raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        message: e.to_string(),
    })
}
