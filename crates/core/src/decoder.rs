// crates/core/src/decoder.rs
//! Byte-to-line decoding for chunked response bodies.
//!
//! Bytes arrive at whatever boundaries the transport chose, which may fall
//! inside a multi-byte UTF-8 character or in the middle of a line. The
//! decoder holds back both: an incomplete UTF-8 sequence stays in
//! [`Utf8Decoder`], and the text after the last `\n` stays in the line
//! buffer until more bytes arrive. The held-back partial line is never
//! emitted as a line, and is capped at [`LineDecoder::max_line_len`] bytes.

use std::char::REPLACEMENT_CHARACTER;

use crate::error::ProtocolError;

/// Default cap on a partial line: 1 MiB.
pub const DEFAULT_MAX_LINE_LEN: usize = 1024 * 1024;

/// Stateful UTF-8 decoder.
///
/// Invalid sequences become U+FFFD exactly as [`String::from_utf8_lossy`]
/// would produce for the concatenated input; an incomplete sequence at the
/// end of a chunk is carried into the next call.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `pending + bytes` as is unambiguous.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let consumed = self.pending.len() - rest.len();
        self.pending.drain(..consumed);
        out
    }

    /// Flush at end-of-stream. A dangling partial sequence becomes one U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            REPLACEMENT_CHARACTER.to_string()
        }
    }

    /// Number of bytes held back waiting for the rest of a character.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// One decoded transport chunk: its text, plus any lines it completed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DecodedChunk {
    /// Decoded text of this chunk alone, before line splitting.
    pub text: String,
    raw_lines: Vec<String>,
}

impl DecodedChunk {
    /// Complete lines exactly as split, without their `\n`.
    pub fn raw_lines(&self) -> &[String] {
        &self.raw_lines
    }

    /// Complete lines, trimmed, with blank lines dropped.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.raw_lines
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
    }
}

/// Splits a byte stream into newline-terminated lines.
#[derive(Debug)]
pub struct LineDecoder {
    utf8: Utf8Decoder,
    buffer: String,
    max_line_len: usize,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::with_max_line_len(DEFAULT_MAX_LINE_LEN)
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail once a partial line grows past `max_line_len` bytes.
    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            utf8: Utf8Decoder::new(),
            buffer: String::new(),
            max_line_len,
        }
    }

    pub fn max_line_len(&self) -> usize {
        self.max_line_len
    }

    /// Feed one chunk of bytes from the transport.
    ///
    /// Errors when the text after the last newline exceeds the line cap.
    /// The buffer is then dropped; the decoder should not be fed again.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<DecodedChunk, ProtocolError> {
        let text = self.utf8.decode(bytes);
        let raw_lines = self.split_lines(&text);
        if self.buffer.len() > self.max_line_len {
            self.buffer = String::new();
            return Err(ProtocolError::LineTooLong {
                limit: self.max_line_len,
            });
        }
        Ok(DecodedChunk { text, raw_lines })
    }

    /// Append decoded text and return the lines it completed.
    fn split_lines(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);

        let Some(last_newline) = self.buffer.rfind('\n') else {
            return Vec::new();
        };

        let rest = self.buffer.split_off(last_newline + 1);
        let mut complete = std::mem::replace(&mut self.buffer, rest);
        complete.pop(); // the final '\n'
        complete.split('\n').map(str::to_owned).collect()
    }

    /// The partial line waiting for its newline.
    pub fn leftover(&self) -> &str {
        &self.buffer
    }

    /// End-of-stream: returns whatever partial line remained. Callers must
    /// not treat it as a message; a line without its newline was cut off.
    pub fn finish(mut self) -> String {
        let tail = self.utf8.finish();
        self.buffer.push_str(&tail);
        self.buffer
    }
}
