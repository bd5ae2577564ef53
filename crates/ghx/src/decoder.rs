// ai
//! 🧩 decoder.rs: newline-delimited JSON in, `EventRecord`s out, one line at a time.
//!
//! An hour of GH Archive decompresses to a few hundred MiB of NDJSON. We do not build
//! a `Vec` of it. `decode()` hands back an iterator that borrows the bytes and decodes
//! the next line only when the caller asks, so the enqueue loop can sit on a full
//! queue between lines without a mountain of parsed events piling up behind it.
//!
//! 🧠 Knowledge graph:
//! - line split: `memchr` on `\n` (SIMD, the metal detector for newlines)
//! - each line: UTF-8 → `RawValue` (validates syntax, keeps bytes) → envelope (`id`, `repo.id`)
//! - a bad line is `Err(GhxError::Decode { line, .. })`, the next line is unaffected
//! - blank lines and `\r` are ignored; line numbers are 1-based and count blanks
//!
//! 🦆 The duck once found a 40 MiB single-line PushEvent. The duck does not talk about it.

use memchr::memchr;
use serde::Deserialize;
use serde_json::value::RawValue;

use crate::common::EventRecord;
use crate::errors::GhxError;

/// 🔢 GitHub sends event ids as strings and repo ids as numbers. We take either, everywhere.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FlexibleId {
    Number(u64),
    Text(String),
}

impl FlexibleId {
    fn into_u64(self, what: &str) -> Result<u64, String> {
        match self {
            FlexibleId::Number(n) => Ok(n),
            FlexibleId::Text(s) => s
                .trim()
                .parse::<u64>()
                .map_err(|e| format!("{what} '{s}' is not an unsigned integer: {e}")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RepoRef {
    id: FlexibleId,
}

/// 📨 The only two fields we look at. Everything else rides along in the raw payload.
#[derive(Debug, Deserialize)]
struct Envelope {
    id: FlexibleId,
    repo: RepoRef,
}

/// 🚰 Lazily decode an NDJSON blob. A fresh iterator per blob, no shared state.
pub fn decode(bytes: &[u8]) -> RecordDecoder<'_> {
    RecordDecoder {
        remaining: bytes,
        line_no: 0,
    }
}

/// 🧵 Iterator over the lines of one blob. See [`decode`].
#[derive(Debug)]
pub struct RecordDecoder<'a> {
    remaining: &'a [u8],
    line_no: usize,
}

impl<'a> RecordDecoder<'a> {
    /// 📏 How many lines (blank ones included) have been consumed so far.
    pub fn lines_consumed(&self) -> usize {
        self.line_no
    }

    /// 📏 Bytes not yet looked at.
    pub fn bytes_remaining(&self) -> usize {
        self.remaining.len()
    }
}

impl<'a> Iterator for RecordDecoder<'a> {
    type Item = Result<EventRecord, GhxError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.remaining.is_empty() {
                return None;
            }
            let (line, rest) = match memchr(b'\n', self.remaining) {
                Some(at) => (&self.remaining[..at], &self.remaining[at + 1..]),
                None => (self.remaining, &self.remaining[self.remaining.len()..]),
            };
            self.remaining = rest;
            self.line_no += 1;

            let line = line.trim_ascii();
            if line.is_empty() {
                continue;
            }
            return Some(decode_line(line, self.line_no));
        }
    }
}

/// 🧩 Decode one line. `line_no` only decorates the error.
pub fn decode_line(line: &[u8], line_no: usize) -> Result<EventRecord, GhxError> {
    let text = std::str::from_utf8(line).map_err(|e| GhxError::Decode {
        line: line_no,
        reason: format!("invalid UTF-8: {e}"),
    })?;
    let raw = RawValue::from_string(text.to_owned()).map_err(|e| GhxError::Decode {
        line: line_no,
        reason: e.to_string(),
    })?;
    decode_raw(raw, line_no)
}

/// 🧩 Decode an already-validated JSON value (the live feed hands us these).
pub fn decode_raw(raw: Box<RawValue>, position: usize) -> Result<EventRecord, GhxError> {
    let envelope: Envelope = serde_json::from_str(raw.get()).map_err(|e| GhxError::Decode {
        line: position,
        reason: e.to_string(),
    })?;
    let as_decode_error = |reason: String| GhxError::Decode {
        line: position,
        reason,
    };
    let event_id = envelope.id.into_u64("event id").map_err(as_decode_error)?;
    let repo_id = envelope
        .repo
        .id
        .into_u64("repo id")
        .map_err(as_decode_error)?;
    Ok(EventRecord {
        event_id,
        repo_id,
        payload: raw,
    })
}
