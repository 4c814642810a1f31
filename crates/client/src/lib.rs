// crates/client/src/lib.rs
//! Streaming clients for the proposal drafting backend.
//!
//! [`StreamClient`] performs one authenticated request whose body is an NDJSON
//! stream and resolves with the `completed` payload. [`SocketClient`] owns a
//! long-lived WebSocket for multi-turn chat and exposes its lifecycle
//! (initialize, reconnect, cancel, retry, disconnect) explicitly.
//!
//! Both are plain values: construct them, hand them to whatever owns the UI
//! session, and drop them when done. There is no process-wide instance.

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod notify;
pub mod socket;

pub use auth::{
    Authenticator, FileTokenStore, MemoryTokenStore, RefreshingAuthenticator, StoredTokens,
    TokenStore,
};
pub use config::ClientConfig;
pub use error::{AuthError, ConfigError, SocketError, StreamError};
pub use http::{StreamCallbacks, StreamClient, StreamRequest};
pub use notify::{ChannelNotifier, LogNotifier, Notice, Notifier};
pub use socket::{ConnectionState, DisconnectReason, SessionCallbacks, SocketClient};

pub use proposal_stream_core::{ChatKind, InboundEnvelope, OutboundEnvelope, Tool};
