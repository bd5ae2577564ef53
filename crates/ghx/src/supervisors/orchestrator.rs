// ai
//! 🗓️ orchestrator.rs: one hour at a time, in order, until the calendar or the operator
//! says stop.
//!
//! Per bucket: `Fetching → Decoding/Enqueuing → Draining → Reporting`, and out the other
//! side comes one [`BucketOutcome`]:
//!
//! | outcome | how we got here |
//! |---|---|
//! | `Done` | fetched, decoded, every worker drew its sentinel |
//! | `SkippedUnavailable` | archive said 404. The hour isn't out yet. |
//! | `SkippedFailed` | archive blew up. Log it, next hour. |
//! | `Future` | the hour hasn't started. Rest of that day is skipped. |
//! | `Aborted` | cancellation was seen somewhere in the middle |
//!
//! 🧠 A fresh [`InsertionPool`] is started per bucket and finished before the next bucket
//! is fetched, so "bucket done" always means "bucket drained". A cancelled bucket is never
//! resumed. The next run starts it over, and since inserts ignore duplicates and the
//! archive is cached, starting over costs a disk read and some `INSERT IGNORE`s.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backends::{ArchiveSource, FetchOutcome, StoreBackend};
use crate::common::{Bucket, BucketRange, QueueItem};
use crate::decoder;
use crate::progress::{ProgressMetrics, gb_per_minute};
use crate::supervisors::pool::{InsertionPool, PoolSettings};

// 🐢 hand the executor back every so often when the queue never pushes back
const YIELD_EVERY_LINES: usize = 1024;

/// 📋 Numbers for one finished bucket.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BucketReport {
    pub(crate) enqueued: u64,
    pub(crate) decode_errors: u64,
    pub(crate) bytes: u64,
    pub(crate) inserted: u64,
    pub(crate) failed: u64,
    pub(crate) elapsed: Duration,
    pub(crate) gb_per_minute: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BucketOutcome {
    Done(BucketReport),
    SkippedUnavailable,
    SkippedFailed,
    Future,
    Aborted,
}

/// 📜 Every bucket the run looked at, in the order it looked.
#[derive(Debug, Default)]
pub(crate) struct RunReport {
    pub(crate) outcomes: Vec<(Bucket, BucketOutcome)>,
}

impl RunReport {
    pub(crate) fn aborted(&self) -> bool {
        self.outcomes
            .last()
            .is_some_and(|(_, outcome)| *outcome == BucketOutcome::Aborted)
    }

    pub(crate) fn buckets_done(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, BucketOutcome::Done(_)))
            .count()
    }

    pub(crate) fn records_inserted(&self) -> u64 {
        self.outcomes
            .iter()
            .filter_map(|(_, o)| match o {
                BucketOutcome::Done(report) => Some(report.inserted),
                _ => None,
            })
            .sum()
    }
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub(crate) struct BatchOrchestrator<A> {
    archive: A,
    store: Arc<StoreBackend>,
    settings: PoolSettings,
    cancel: CancellationToken,
    clock: Clock,
}

impl<A: std::fmt::Debug> std::fmt::Debug for BatchOrchestrator<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOrchestrator")
            .field("archive", &self.archive)
            .field("settings", &self.settings)
            .finish()
    }
}

impl<A: ArchiveSource> BatchOrchestrator<A> {
    pub(crate) fn new(
        archive: A,
        store: Arc<StoreBackend>,
        settings: PoolSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            archive,
            store,
            settings,
            cancel,
            clock: Arc::new(Utc::now),
        }
    }

    /// ⏰ Replace the wall clock, for deciding which hours are still in the future.
    pub(crate) fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// 🚀 Walk `range` day by day, hour by hour.
    pub(crate) async fn run(&self, range: BucketRange) -> RunReport {
        let mut report = RunReport::default();
        'days: for day in range.days() {
            for bucket in Bucket::hours_of(day) {
                if self.cancel.is_cancelled() {
                    report.outcomes.push((bucket, BucketOutcome::Aborted));
                    break 'days;
                }
                if bucket.is_in_future((self.clock)()) {
                    info!(bucket = %bucket, "🔮 bucket is in the future, done with this day");
                    report.outcomes.push((bucket, BucketOutcome::Future));
                    continue 'days;
                }

                let outcome = self.process(bucket).await;
                let aborted = outcome == BucketOutcome::Aborted;
                report.outcomes.push((bucket, outcome));
                if aborted {
                    break 'days;
                }
            }
        }
        info!(
            buckets = report.buckets_done(),
            records = report.records_inserted(),
            aborted = report.aborted(),
            "🗓️ batch run over"
        );
        report
    }

    /// 🛑 A cancelled run aborts. A pool that fell over on its own only loses this bucket.
    fn interrupted(&self) -> BucketOutcome {
        if self.cancel.is_cancelled() {
            BucketOutcome::Aborted
        } else {
            BucketOutcome::SkippedFailed
        }
    }

    async fn process(&self, bucket: Bucket) -> BucketOutcome {
        // 📡 Fetching
        let fetched = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return BucketOutcome::Aborted,
            fetched = self.archive.fetch(&bucket) => fetched,
        };
        let bytes = match fetched {
            Ok(FetchOutcome::Fetched(bytes)) => bytes,
            Ok(FetchOutcome::NotAvailable) => {
                warn!(bucket = %bucket, "💤 bucket not published, skipping");
                return BucketOutcome::SkippedUnavailable;
            }
            Err(e) => {
                warn!(bucket = %bucket, error = %e, "📡 bucket fetch failed, skipping");
                return BucketOutcome::SkippedFailed;
            }
        };

        // 🧩 Decoding/Enqueuing
        let pool = InsertionPool::start(
            self.settings.workers,
            self.settings.capacity,
            Arc::clone(&self.store),
            self.cancel.clone(),
        );
        let tx = pool.sender();
        let total = bytes.len() as u64;
        let mut progress = ProgressMetrics::new(bucket.key(), total, self.settings.show_progress);
        let mut decode_errors = 0u64;
        let mut lines = decoder::decode(&bytes);
        let mut seen = total;

        while let Some(decoded) = lines.next() {
            let remaining = lines.bytes_remaining() as u64;
            let consumed = seen - remaining;
            seen = remaining;

            let record = match decoded {
                Ok(record) => record,
                Err(e) => {
                    warn!(bucket = %bucket, error = %e, "🧩 skipping a line that didn't decode");
                    decode_errors += 1;
                    progress.update(consumed, 0);
                    continue;
                }
            };

            let sent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => false,
                sent = tx.send(QueueItem::Record(record)) => sent.is_ok(),
            };
            if !sent {
                drop(tx);
                progress.finish();
                let pool_report = pool.abort().await;
                let outcome = self.interrupted();
                warn!(bucket = %bucket, inserted = pool_report.inserted, ?outcome, "🛑 bucket cut short mid-enqueue");
                return outcome;
            }
            progress.update(consumed, 1);

            if lines.lines_consumed() % YIELD_EVERY_LINES == 0 {
                tokio::task::yield_now().await;
            }
        }
        drop(tx);
        progress.finish();

        // 🚰 Draining
        let pool_report = pool.finish().await;
        if !pool_report.fully_drained() {
            let outcome = self.interrupted();
            warn!(bucket = %bucket, inserted = pool_report.inserted, ?outcome, "🛑 bucket cut short while draining");
            return outcome;
        }

        // 📊 Reporting
        let elapsed = progress.elapsed();
        let report = BucketReport {
            enqueued: progress.total_docs(),
            decode_errors,
            bytes: progress.total_bytes(),
            inserted: pool_report.inserted,
            failed: pool_report.failed,
            elapsed,
            gb_per_minute: gb_per_minute(total, elapsed),
        };
        info!(
            bucket = %bucket,
            bytes = report.bytes,
            decode_errors = report.decode_errors,
            insert_failures = report.failed,
            elapsed_secs = report.elapsed.as_secs_f64(),
            "Ingested {} GitHub events ({:.2} GB/minute)",
            report.enqueued,
            report.gb_per_minute
        );
        BucketOutcome::Done(report)
    }
}
