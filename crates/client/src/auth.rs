// crates/client/src/auth.rs
//! Bearer-token storage and refresh.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::error::{AuthError, ConfigError};

/// Tokens as persisted. The bearer token always lives under `access_token`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTokens {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Local persisted key-value store for credentials.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<StoredTokens, AuthError>;
    fn save(&self, tokens: &StoredTokens) -> Result<(), AuthError>;
}

/// JSON credentials file. A missing file reads as "no tokens".
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<StoredTokens, AuthError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StoredTokens::default())
            }
            Err(e) => return Err(AuthError::io(&self.path, e)),
        };
        serde_json::from_slice(&bytes).map_err(|e| AuthError::Malformed {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    fn save(&self, tokens: &StoredTokens) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AuthError::io(parent, e))?;
        }
        let json = serde_json::to_vec_pretty(tokens).map_err(|e| AuthError::Malformed {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        std::fs::write(&self.path, json).map_err(|e| AuthError::io(&self.path, e))
    }
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<StoredTokens>,
}

impl MemoryTokenStore {
    pub fn new(tokens: StoredTokens) -> Self {
        Self {
            tokens: Mutex::new(tokens),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<StoredTokens, AuthError> {
        Ok(self.tokens.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, tokens: &StoredTokens) -> Result<(), AuthError> {
        *self.tokens.lock().unwrap_or_else(|e| e.into_inner()) = tokens.clone();
        Ok(())
    }
}

/// Source of bearer tokens for [`crate::StreamClient`].
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// The stored bearer token, if any.
    async fn access_token(&self) -> Option<String>;

    /// Obtain a fresh bearer token and persist it.
    async fn refresh(&self) -> Result<String, AuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenRefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Reads tokens from a [`TokenStore`] and refreshes them against the
/// backend's refresh endpoint.
pub struct RefreshingAuthenticator<S> {
    store: S,
    http: reqwest::Client,
    refresh_url: Url,
}

impl<S: TokenStore> RefreshingAuthenticator<S> {
    pub fn new(store: S, http: reqwest::Client, refresh_url: Url) -> Self {
        Self {
            store,
            http,
            refresh_url,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl RefreshingAuthenticator<FileTokenStore> {
    /// File-backed authenticator at the configured credentials path.
    pub fn from_config(config: &ClientConfig, http: reqwest::Client) -> Result<Self, ConfigError> {
        let path = config.token_file_path().ok_or(ConfigError::NoTokenFile)?;
        Ok(Self::new(FileTokenStore::new(path), http, config.refresh_url()?))
    }
}

#[async_trait]
impl<S: TokenStore> Authenticator for RefreshingAuthenticator<S> {
    async fn access_token(&self) -> Option<String> {
        match self.store.load() {
            Ok(tokens) => tokens.access_token.filter(|t| !t.is_empty()),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read token store");
                None
            }
        }
    }

    async fn refresh(&self) -> Result<String, AuthError> {
        let mut tokens = self.store.load()?;
        let refresh_token = tokens
            .refresh_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::NoRefreshToken)?;

        let resp = self
            .http
            .post(self.refresh_url.clone())
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        if !resp.status().is_success() {
            tracing::warn!(status = %resp.status(), "Token refresh failed");
            return Err(AuthError::Rejected {
                status: resp.status().as_u16(),
            });
        }

        let data: TokenRefreshResponse = resp.json().await?;
        tokens.access_token = Some(data.access_token.clone());
        if data.refresh_token.is_some() {
            tokens.refresh_token = data.refresh_token;
        }
        self.store.save(&tokens)?;
        tracing::debug!("Access token refreshed");
        Ok(data.access_token)
    }
}
