// crates/core/src/message.rs
//! NDJSON stream messages and their classification.
//!
//! Wire format, one object per line:
//!
//! ```text
//! {"status":"processing","message":"Drafting section 2"}
//! {"status":"completed","data":{...}}
//! {"status":"error","message":"Upstream model unavailable"}
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One decoded NDJSON line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StreamMessage {
    Processing {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Completed {
        /// `Some(Value::Null)` for an explicit `"data": null`, `None` when absent.
        #[serde(
            default,
            deserialize_with = "present",
            skip_serializing_if = "Option::is_none"
        )]
        data: Option<Value>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Any status this client does not know about.
    #[serde(other)]
    Unknown,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// What one line means for the stream that carried it.
#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    /// Progress text for the processing callback.
    Processing(String),
    /// A final payload.
    Completed(Value),
    /// Server-reported failure; aborts the stream.
    Failed(String),
    /// Malformed JSON, an unknown status, or a recognised status missing
    /// the field it needs. Nothing to dispatch.
    Skipped,
}

/// Classify one trimmed, non-empty line.
///
/// A line that is not valid JSON is logged and skipped; one bad line never
/// fails the stream.
pub fn classify_line(line: &str) -> LineEvent {
    let message = match serde_json::from_str::<StreamMessage>(line) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, line = %truncate(line, 200), "Skipping malformed stream line");
            return LineEvent::Skipped;
        }
    };

    match message {
        StreamMessage::Processing {
            message: Some(text),
        } if !text.is_empty() => LineEvent::Processing(text),
        StreamMessage::Completed { data: Some(data) } => LineEvent::Completed(data),
        StreamMessage::Error {
            message: Some(text),
        } => LineEvent::Failed(text),
        StreamMessage::Unknown => {
            tracing::debug!(line = %truncate(line, 200), "Ignoring stream line with unknown status");
            LineEvent::Skipped
        }
        _ => LineEvent::Skipped,
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
