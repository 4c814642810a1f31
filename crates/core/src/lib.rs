// crates/core/src/lib.rs
//! Transport-free protocol logic shared by the streaming clients.
//!
//! - [`decoder`] turns arbitrarily chunked bytes into complete text lines.
//! - [`message`] classifies one NDJSON line by its `status` discriminator.
//! - [`completion`] tracks `completed` messages against a [`CompletionPolicy`].
//! - [`envelope`] holds the WebSocket wire types (inbound and outbound).

pub mod completion;
pub mod decoder;
pub mod envelope;
pub mod error;
pub mod message;

pub use completion::*;
pub use decoder::*;
pub use envelope::*;
pub use error::*;
pub use message::*;
