// crates/core/src/error.rs
use thiserror::Error;

/// Terminal failures detected by the protocol layer itself, independent of
/// the transport that carried the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The server sent `{"status":"error","message":...}`.
    #[error("{message}")]
    Server { message: String },

    /// End-of-stream arrived before any `completed` message.
    #[error("Stream ended without a completion message.")]
    NoCompletion,

    /// A line grew past the decoder's cap without a newline.
    #[error("Stream line exceeded {limit} bytes without a newline.")]
    LineTooLong { limit: usize },
}

impl ProtocolError {
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            message: message.into(),
        }
    }
}
