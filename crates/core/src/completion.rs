// crates/core/src/completion.rs
//! When a stream counts as done, and what it resolves with.

use serde_json::Value;

use crate::error::ProtocolError;

/// How `completed` messages settle a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionPolicy {
    /// One result. The first `completed` wins, later ones are ignored, and
    /// the body is read to its end.
    #[default]
    Single,
    /// A multi-item operation (e.g. regenerating several sections). Every
    /// `completed` is a result; reading stops once `expected` have arrived.
    Batch { expected: usize },
}

/// Whether a `completed` payload was taken or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Accepted,
    Ignored,
}

/// Per-request completion state. Dropped when the request settles.
#[derive(Debug)]
pub struct CompletionTracker {
    policy: CompletionPolicy,
    results: Vec<Value>,
}

impl CompletionTracker {
    pub fn new(policy: CompletionPolicy) -> Self {
        let policy = match policy {
            CompletionPolicy::Batch { expected } => CompletionPolicy::Batch {
                expected: expected.max(1),
            },
            single => single,
        };
        Self {
            policy,
            results: Vec::new(),
        }
    }

    pub fn policy(&self) -> CompletionPolicy {
        self.policy
    }

    pub fn record(&mut self, data: Value) -> Recorded {
        match self.policy {
            CompletionPolicy::Single if !self.results.is_empty() => {
                tracing::warn!("Ignoring repeated completion message on single-result stream");
                Recorded::Ignored
            }
            CompletionPolicy::Batch { expected } if self.results.len() >= expected => {
                Recorded::Ignored
            }
            _ => {
                self.results.push(data);
                Recorded::Accepted
            }
        }
    }

    /// Most recently accepted payload.
    pub fn last(&self) -> Option<&Value> {
        self.results.last()
    }

    pub fn received(&self) -> usize {
        self.results.len()
    }

    /// True once no further input can change the outcome.
    pub fn is_satisfied(&self) -> bool {
        match self.policy {
            CompletionPolicy::Single => false,
            CompletionPolicy::Batch { expected } => self.results.len() >= expected,
        }
    }

    /// Settle at end-of-stream.
    pub fn finish(self) -> Result<Vec<Value>, ProtocolError> {
        if self.results.is_empty() {
            return Err(ProtocolError::NoCompletion);
        }
        if let CompletionPolicy::Batch { expected } = self.policy {
            if self.results.len() < expected {
                tracing::warn!(
                    expected,
                    received = self.results.len(),
                    "Batch stream ended early, resolving with partial results"
                );
            }
        }
        Ok(self.results)
    }
}
