// crates/client/src/notify.rs
//! User-visible notifications ("toasts") raised by the HTTP streaming path.

use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub message: String,
}

/// Receives failures that should be surfaced to the user regardless of
/// what the calling component does with the error.
pub trait Notifier: Send + Sync {
    fn error(&self, message: &str);
}

/// Writes notices to the log. Default for headless use.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn error(&self, message: &str) {
        tracing::error!(%message, "Stream failed");
    }
}

/// Forwards notices to a UI layer over a channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notice>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn error(&self, message: &str) {
        // Receiver may be gone.
        let _ = self.tx.send(Notice {
            message: message.to_string(),
        });
    }
}
