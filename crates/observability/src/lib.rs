// crates/observability/src/lib.rs
//! Tracing setup shared by the CLI and integration harnesses.
//!
//! `RUST_LOG` wins when set; otherwise the caller's default directive is used.
//! Set `PROPOSAL_STREAM_LOG_FORMAT=json` for one JSON object per event.

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub const ENV_LOG_FORMAT: &str = "PROPOSAL_STREAM_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    /// Unknown values fall back to the human format.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }

    pub fn from_env() -> Self {
        std::env::var(ENV_LOG_FORMAT)
            .map(|v| Self::parse(&v))
            .unwrap_or_default()
    }
}

#[derive(Debug, Error)]
#[error("Failed to install tracing subscriber: {0}")]
pub struct InitError(String);

/// Build the filter: `RUST_LOG` if present and valid, else `default_directive`.
pub fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install the global subscriber. Logs go to stderr so stdout stays free for
/// command output.
pub fn init_tracing(default_directive: &str) -> Result<(), InitError> {
    let filter = env_filter(default_directive);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    match LogFormat::from_env() {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    }
    .map_err(|e| InitError(e.to_string()))
}
