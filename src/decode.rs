//! Incremental stream decoding and result normalization.
//!
//! The search endpoint streams bytes, and chunk boundaries fall wherever the
//! network puts them, including inside a multi-byte UTF-8 sequence.
//! [`StreamDecoder`] carries the incomplete tail of one chunk over to the
//! next so no character is corrupted or dropped.

use regex::Regex;
use std::sync::LazyLock;

const REPLACEMENT: char = '\u{FFFD}';

/// Stateful UTF-8 decoder for a sequence of byte chunks.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    /// Bytes of a code point that started in the previous chunk (at most 3).
    pending: Vec<u8>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one chunk, returning all text that is complete so far.
    ///
    /// Invalid sequences become U+FFFD. A sequence cut off at the end of the
    /// chunk is held back until the next call.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut out = String::with_capacity(buf.len());
        let mut rest = &buf[..];
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // prefix up to valid_up_to is always UTF-8
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(bad) => {
                            out.push(REPLACEMENT);
                            rest = &after[bad..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush at end of stream. A truncated trailing sequence becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            REPLACEMENT.to_string()
        }
    }

    /// Whether a partial code point is waiting for more bytes.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

static BLANK_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("static regex is valid"));

/// Collapse runs of blank lines into a single newline and trim both ends.
///
/// Idempotent: applying it to its own output changes nothing.
pub fn normalize(text: &str) -> String {
    BLANK_RUN.replace_all(text, "\n").trim().to_string()
}

/// Append-only text accumulator for one search.
///
/// Normalization is always recomputed from the full raw text, never from the
/// delta, so whitespace split across chunks collapses correctly.
#[derive(Debug, Default)]
pub struct Accumulator {
    decoder: StreamDecoder,
    raw: String,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return the normalized text so far.
    pub fn push(&mut self, chunk: &[u8]) -> String {
        let text = self.decoder.decode(chunk);
        self.raw.push_str(&text);
        normalize(&self.raw)
    }

    /// Flush the decoder and return the final normalized text.
    pub fn finish(&mut self) -> String {
        let tail = self.decoder.finish();
        self.raw.push_str(&tail);
        normalize(&self.raw)
    }

    /// Normalized text received so far, without flushing the decoder.
    pub fn text(&self) -> String {
        normalize(&self.raw)
    }
}
