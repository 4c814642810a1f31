// crates/core/src/envelope.rs
//! WebSocket envelopes for the chat playground.
//!
//! Outbound frames are sparse: optional fields are omitted, never sent as
//! `null`. Inbound frames are discriminated by `type`.

use serde::{Deserialize, Deserializer, Serialize};

/// Which pipeline the server should run a turn through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChatKind {
    Chat,
    DeepResearch,
}

/// Tool the assistant may use for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Web,
}

/// A user turn sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    pub thread_id: String,
    #[serde(rename = "type")]
    pub kind: ChatKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<Tool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contexts: Vec<String>,
}

impl OutboundEnvelope {
    pub fn new(thread_id: impl Into<String>, kind: ChatKind, message: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            kind,
            message: message.into(),
            tool: None,
            contexts: Vec::new(),
        }
    }

    pub fn with_tool(mut self, tool: Option<Tool>) -> Self {
        self.tool = tool;
        self
    }

    /// Blank tags are dropped so an all-blank list is omitted from the wire.
    pub fn with_contexts<I, S>(mut self, contexts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.contexts = contexts
            .into_iter()
            .map(Into::into)
            .filter(|c: &String| !c.trim().is_empty())
            .collect();
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A server frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEnvelope {
    /// A new assistant turn began.
    Start,
    /// Incremental content for the current turn.
    Chunk {
        /// Missing and `null` both read as empty.
        #[serde(default, deserialize_with = "null_as_empty")]
        content: String,
    },
    /// The turn was cut short.
    Interrupted {
        #[serde(
            default,
            rename = "accumulatedContent",
            skip_serializing_if = "Option::is_none"
        )]
        accumulated_content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    /// A long-running sub-task started; no chunks until `webhook_result`.
    ResearchInitiated {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    /// Final answer of the long-running sub-task.
    WebhookResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    /// The turn ended normally.
    Complete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thread_id: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl InboundEnvelope {
    /// Parse one text frame. Malformed frames are logged and dropped.
    pub fn from_frame(text: &str) -> Option<Self> {
        match serde_json::from_str::<Self>(text) {
            Ok(Self::Unknown) => {
                tracing::debug!(frame = %text, "Ignoring envelope of unknown type");
                None
            }
            Ok(envelope) => Some(envelope),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed socket frame");
                None
            }
        }
    }

    /// True for envelopes that end a turn.
    pub fn ends_turn(&self) -> bool {
        matches!(
            self,
            Self::Complete { .. } | Self::Interrupted { .. } | Self::WebhookResult { .. }
        )
    }
}
