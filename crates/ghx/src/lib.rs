//! 🦆 ghx: GH Archive in, partitioned MySQL out, aggregates on a timer.
//!
//! The binary builds an [`app_config::AppConfig`], installs a [`shutdown::Shutdown`], and
//! calls [`run`]. Everything else is behind the supervisor.

pub mod app_config;
pub mod common;
pub mod decoder;
pub mod errors;
pub mod shutdown;

mod backends;
mod progress;
mod supervisors;

pub use backends::{
    ArchiveConfig, ArchiveSource, CachedHttpArchive, FeedConfig, FeedPage, FetchOutcome,
    GitHubEventsFeed, InMemoryArchive, LiveFeed, MysqlStoreConfig, StoreConfig,
};

use anyhow::{Context, Result};
use tracing::info;

use crate::app_config::AppConfig;
use crate::shutdown::Shutdown;
use crate::supervisors::Supervisor;

/// 🚀 Validate, connect, and run until the work is done or `shutdown` fires.
///
/// Only startup problems come back as errors. Once the pipeline is running, bad rows,
/// missing hours and sulking partitions are logged and survived.
pub async fn run(app_config: AppConfig, shutdown: &Shutdown) -> Result<()> {
    app_config
        .validate()
        .context("💀 the configuration doesn't add up")?;

    let supervisor = Supervisor::new(app_config, shutdown.token());
    let summary = supervisor.start().await?;
    info!(
        buckets = summary.buckets_done,
        records = summary.records_inserted,
        ticks = summary.aggregation_ticks,
        aggregated = summary.aggregated,
        "🏁 ghx is done"
    );
    Ok(())
}
