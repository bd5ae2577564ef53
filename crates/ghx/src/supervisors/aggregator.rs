//! 🧮 The shard aggregator: every N seconds, poke every partition at once and add up
//! what they say.
//!
//! One tick = one concurrent `aggregate()` per partition, wait for all of them, sum.
//! A partition that errors is logged and counts as zero. Its cursor didn't move, so the
//! next tick picks up exactly where it left off.
//!
//! ⏲️ Fixed delay, not fixed rate: the sleep starts after the tick ends. A slow tick pushes
//! the next one back instead of stacking up behind it.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backends::{Partition, PartitionBackend};
use crate::errors::GhxError;

/// 📋 One tick's verdict.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TickReport {
    pub(crate) aggregated: u64,
    pub(crate) failed_partitions: usize,
    pub(crate) elapsed: Duration,
}

/// 📋 The aggregator's whole shift.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct AggregatorReport {
    pub(crate) ticks: u64,
    pub(crate) aggregated: u64,
}

#[derive(Debug)]
pub(crate) struct ShardAggregator {
    partitions: Vec<PartitionBackend>,
    interval: Duration,
    cancel: CancellationToken,
}

impl ShardAggregator {
    pub(crate) fn new(
        partitions: Vec<PartitionBackend>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            partitions,
            interval,
            cancel,
        }
    }

    /// 🔄 Aggregate every partition in parallel and report the sum.
    pub(crate) async fn tick(&self) -> TickReport {
        let started = Instant::now();
        let aggregated = AtomicU64::new(0);
        let failed = AtomicUsize::new(0);

        join_all(self.partitions.iter().map(|partition| {
            let aggregated = &aggregated;
            let failed = &failed;
            async move {
                match partition.aggregate().await {
                    Ok(count) => {
                        debug!(partition = partition.index(), count, "🧮 partition aggregated");
                        aggregated.fetch_add(count, Ordering::Relaxed);
                    }
                    Err(e) => {
                        let e = GhxError::AggregationCall {
                            partition: partition.index(),
                            reason: format!("{e:#}"),
                        };
                        warn!(error = %e, "🧮 partition counts as zero this tick");
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }))
        .await;

        let report = TickReport {
            aggregated: aggregated.into_inner(),
            failed_partitions: failed.into_inner(),
            elapsed: started.elapsed(),
        };
        info!(
            failed_partitions = report.failed_partitions,
            "extract_commits() processed {} events in {:.2} seconds",
            report.aggregated,
            report.elapsed.as_secs_f64()
        );
        report
    }

    /// ⏲️ Tick, sleep, repeat, until cancelled. Cancellation is checked before every tick
    /// and interrupts the sleep. A tick already running is allowed to finish.
    pub(crate) async fn run(&self) -> AggregatorReport {
        let mut report = AggregatorReport::default();
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let tick = self.tick().await;
            report.ticks += 1;
            report.aggregated += tick.aggregated;

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        debug!(ticks = report.ticks, aggregated = report.aggregated, "🧮 aggregator clocked out");
        report
    }
}
