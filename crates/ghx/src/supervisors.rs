//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 *[dramatic orchestral music swells]*
//! 🎬 "In a world where workers toil endlessly..."
//! 🎬 "One supervisor dared to manage them all."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Supervisor connects the store, then runs two things side by side until they're
//! both done: the ingestion half (bulk orchestrator or live poller, depending on `mode`)
//! and the shard aggregator. Both watch the same cancellation token.
//!
//! 🗓️ A bulk run that reaches the end of its date range does not end the process. The
//! aggregator keeps folding what was loaded until someone sends a signal.
//!
//! ⚠️ DO NOT MAKE THIS PUB EVER
//! 💀 WORKERS ARE SUPERVISORS PRIVATE LITTLE MINIONS WHOM THE WORLD FORGOT ABOUT

pub(crate) mod aggregator;
pub(crate) mod orchestrator;
pub(crate) mod poller;
pub(crate) mod pool;
mod workers;

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::app_config::{AppConfig, RunMode};
use crate::backends::{
    self, ArchiveSource, CachedHttpArchive, GitHubEventsFeed, LiveFeed, PartitionBackend,
    StoreBackend, StoreConfig,
};
use aggregator::ShardAggregator;
use orchestrator::BatchOrchestrator;
use poller::LivePoller;
use pool::{InsertionPool, PoolSettings};

/// 📋 What a whole run amounted to.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct RunSummary {
    pub(crate) buckets_done: usize,
    pub(crate) records_inserted: u64,
    pub(crate) aggregation_ticks: u64,
    pub(crate) aggregated: u64,
}

/// 📦 The Supervisor: because even async tasks need someone hovering over them
/// asking "is it done yet?" every 5 milliseconds.
#[derive(Debug)]
pub(crate) struct Supervisor {
    app_config: AppConfig,
    cancel: CancellationToken,
}

impl Supervisor {
    pub(crate) fn new(app_config: AppConfig, cancel: CancellationToken) -> Self {
        Self { app_config, cancel }
    }

    /// 🚀 Connect, provision, and run the configured mode until done or cancelled.
    pub(crate) async fn start(&self) -> Result<RunSummary> {
        if matches!(self.app_config.store, StoreConfig::InMemory {}) {
            warn!("🧠 running against the in-memory store, nothing will survive this process");
        }
        let (store, partitions) = backends::connect(&self.app_config).await?;
        let store = Arc::new(store);

        match self.app_config.runtime.mode {
            RunMode::Bulk => {
                let archive = CachedHttpArchive::new(self.app_config.archive.clone()).await?;
                Ok(self.run_bulk(archive, store, partitions).await)
            }
            RunMode::Live => {
                let feed = GitHubEventsFeed::new(&self.app_config.feed)?;
                Ok(self.run_live(feed, store, partitions).await)
            }
        }
    }

    fn aggregator(&self, partitions: Vec<PartitionBackend>) -> ShardAggregator {
        ShardAggregator::new(
            partitions,
            self.app_config.runtime.aggregation_interval(),
            self.cancel.clone(),
        )
    }

    async fn run_bulk<A: ArchiveSource>(
        &self,
        archive: A,
        store: Arc<StoreBackend>,
        partitions: Vec<PartitionBackend>,
    ) -> RunSummary {
        let settings = PoolSettings::from_runtime(&self.app_config.runtime);
        let orchestrator = BatchOrchestrator::new(archive, store, settings, self.cancel.clone());
        let aggregator = self.aggregator(partitions);
        let range = self.app_config.bucket_range();

        let loading = async {
            let report = orchestrator.run(range).await;
            if !report.aborted() {
                info!("🗓️ bulk load complete, aggregation continues until interrupted");
            }
            report
        };
        let (report, aggregated) = tokio::join!(loading, aggregator.run());

        RunSummary {
            buckets_done: report.buckets_done(),
            records_inserted: report.records_inserted(),
            aggregation_ticks: aggregated.ticks,
            aggregated: aggregated.aggregated,
        }
    }

    async fn run_live<F: LiveFeed + 'static>(
        &self,
        feed: F,
        store: Arc<StoreBackend>,
        partitions: Vec<PartitionBackend>,
    ) -> RunSummary {
        let settings = PoolSettings::from_runtime(&self.app_config.runtime);
        let pool = InsertionPool::start(
            settings.workers,
            settings.capacity,
            store,
            self.cancel.clone(),
        );
        let poller = LivePoller::new(
            feed,
            self.app_config.runtime.poll_interval(),
            self.cancel.clone(),
        );
        let aggregator = self.aggregator(partitions);

        let (polled, aggregated) = tokio::join!(poller.run(pool.sender()), aggregator.run());
        let pool_report = pool.abort().await;
        info!(
            enqueued = polled.enqueued,
            inserted = pool_report.inserted,
            "📡 live polling stopped"
        );

        RunSummary {
            buckets_done: 0,
            records_inserted: pool_report.inserted,
            aggregation_ticks: aggregated.ticks,
            aggregated: aggregated.aggregated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{FeedPage, InMemoryArchive};
    use crate::common::{Bucket, EventRecord};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::value::RawValue;
    use std::time::Duration;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.runtime.worker_count = 4;
        config.runtime.queue_capacity = Some(16);
        config.runtime.partitions = 3;
        config.runtime.show_progress = false;
        config.archive.start = NaiveDate::from_ymd_opt(2019, 6, 1).expect("💀");
        config.archive.end = NaiveDate::from_ymd_opt(2019, 6, 1).expect("💀");
        config
    }

    fn ndjson(ids: std::ops::RangeInclusive<u64>) -> Vec<u8> {
        ids.map(|id| format!("{{\"id\":\"{id}\",\"repo\":{{\"id\":{}}}}}\n", id % 4))
            .collect::<String>()
            .into_bytes()
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_bulk_loads_and_the_aggregator_catches_everything() {
        let config = test_config();
        let cancel = CancellationToken::new();
        let supervisor = Arc::new(Supervisor::new(config.clone(), cancel.clone()));
        let (store, partitions) = backends::connect(&config).await.expect("💀 in-memory connect");

        let archive = InMemoryArchive::new()
            .with_hour(Bucket::new(2019, 6, 1, 0).expect("💀"), ndjson(1..=40))
            .with_hour(Bucket::new(2019, 6, 1, 13).expect("💀"), ndjson(41..=100));

        let running = tokio::spawn({
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.run_bulk(archive, Arc::new(store), partitions).await }
        });
        // ⏩ the load finishes at t = 0, the aggregator ticks at 0s, 20s, 40s, 60s
        tokio::time::sleep(Duration::from_secs(61)).await;
        cancel.cancel();
        let summary = running.await.expect("💀 supervisor panicked");

        assert_eq!(summary.buckets_done, 2);
        assert_eq!(summary.records_inserted, 100);
        assert_eq!(summary.aggregation_ticks, 4);
        assert_eq!(summary.aggregated, 100, "every loaded row folded exactly once");
    }

    /// 📡 One page, then silence.
    #[derive(Debug)]
    struct OnePageFeed;

    #[async_trait]
    impl LiveFeed for OnePageFeed {
        async fn fetch(&self, token: Option<&str>) -> Result<FeedPage> {
            if token.is_some() {
                return Ok(FeedPage::NotModified);
            }
            let records = (1..=5)
                .map(|event_id| EventRecord {
                    event_id,
                    repo_id: 1,
                    payload: RawValue::from_string("{}".to_string()).expect("💀 valid JSON"),
                })
                .collect();
            Ok(FeedPage::Page {
                records,
                token: Some("\"etag\"".to_string()),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_live_mode_feeds_the_same_pool_and_stops_on_cancel() {
        let mut config = test_config();
        config.runtime.mode = RunMode::Live;
        let cancel = CancellationToken::new();
        let supervisor = Arc::new(Supervisor::new(config.clone(), cancel.clone()));
        let (store, partitions) = backends::connect(&config).await.expect("💀 in-memory connect");

        let running = tokio::spawn({
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.run_live(OnePageFeed, Arc::new(store), partitions).await }
        });
        tokio::time::sleep(Duration::from_secs(21)).await;
        cancel.cancel();
        let summary = running.await.expect("💀 supervisor panicked");

        assert_eq!(summary.records_inserted, 5);
        assert_eq!(summary.aggregated, 5, "the 20s tick saw the live rows");
    }
}
