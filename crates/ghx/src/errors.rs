// ai
//! 🏷️ errors.rs: the taxonomy of things that go wrong at 3am.
//!
//! Most of ghx speaks `anyhow` like the rest of the crate. This enum exists for the
//! handful of failures the pipeline has to *classify*: a bad line gets skipped, a bad
//! insert gets logged, a bad partition contributes zero. Only `FatalStartup` is allowed
//! to end the process. Everything else is a bruise, not a fracture. 🦆
//!
//! 📜 "Not Found" is not in here: an unpublished archive hour is
//! `FetchOutcome::NotAvailable`, a perfectly normal Tuesday.

use thiserror::Error;

/// 💀 Classified pipeline failures. Logged and recovered locally, except `FatalStartup`.
#[derive(Debug, Error)]
pub enum GhxError {
    /// 📡 Network or storage hiccup while fetching an archive bucket. Skip the bucket.
    #[error("💀 fetching archive bucket '{bucket}' failed: {reason}")]
    FetchFailed { bucket: String, reason: String },

    /// 🧩 One line of one archive did not decode. Skip the line, keep the stream.
    #[error("🧩 line {line} did not decode into an event: {reason}")]
    Decode { line: usize, reason: String },

    /// 🗄️ A single insert failed. The worker shrugs and takes the next one.
    #[error("🗄️ inserting event {event_id} failed: {reason}")]
    Insert { event_id: u64, reason: String },

    /// 🧮 One partition's aggregation call failed this tick. Counts as zero, retried next tick.
    #[error("🧮 aggregation on partition {partition} failed: {reason}")]
    AggregationCall { partition: usize, reason: String },

    /// ☠️ Could not reach the primary store or create what it needs. Nothing else runs.
    #[error("☠️ fatal startup error: {0}")]
    FatalStartup(String),
}

impl GhxError {
    /// 🚦 Only startup failures are allowed to stop the show.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GhxError::FatalStartup(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_only_startup_failures_are_fatal() {
        let the_bruises = [
            GhxError::FetchFailed {
                bucket: "2019-06-01-3".into(),
                reason: "connection reset".into(),
            },
            GhxError::Decode {
                line: 7,
                reason: "expected value".into(),
            },
            GhxError::Insert {
                event_id: 42,
                reason: "lost connection".into(),
            },
            GhxError::AggregationCall {
                partition: 2,
                reason: "deadlock".into(),
            },
        ];
        for bruise in &the_bruises {
            assert!(!bruise.is_fatal(), "{bruise} should be recoverable");
        }
        assert!(GhxError::FatalStartup("no database".into()).is_fatal());
    }

    #[test]
    fn the_one_where_decode_errors_name_their_line() {
        let err = GhxError::Decode {
            line: 999,
            reason: "EOF while parsing".into(),
        };
        assert!(err.to_string().contains("line 999"));
    }
}
