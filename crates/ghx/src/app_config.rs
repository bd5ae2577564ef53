//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing.": every developer at 3am 🦆
//!
//! 🏗️ Built once at startup, validated once, then handed around by reference. Nobody
//! reads a global. Nobody mutates a flag mid-run. The struct is the single source of truth
//! and it is immutable after `load_config` + CLI overrides.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::{ArchiveConfig, FeedConfig, StoreConfig};
use crate::common::BucketRange;

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// 🚦 Which half of the program runs alongside the aggregator.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// 🗜️ Walk the archive from `archive.start` to `archive.end`.
    #[default]
    Bulk,
    /// 📡 Poll the live feed until told to stop.
    Live,
}

impl FromStr for RunMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bulk" => Ok(RunMode::Bulk),
            "live" => Ok(RunMode::Live),
            other => anyhow::bail!("💀 unknown mode '{other}'. It's 'bulk' or 'live'."),
        }
    }
}

/// ⚙️ The knobs that shape the pipeline itself.
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// 🧵 Insertion workers per pool. Also sizes the frontend connection pool (x2).
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// 📬 Bounded queue capacity. Leave unset to derive it from `worker_count`.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    /// 🧮 Backend partitions to aggregate.
    #[serde(default = "default_partitions")]
    pub partitions: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_aggregation_interval_secs")]
    pub aggregation_interval_secs: u64,
    /// ⏳ How long a cooperative shutdown may take before we stop being polite.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default = "default_show_progress")]
    pub show_progress: bool,
}

// 📬 200 slots per worker: enough to absorb a burst, not enough to eat the heap.
const QUEUE_SLOTS_PER_WORKER: usize = 200;

fn default_worker_count() -> usize {
    500
}

fn default_partitions() -> usize {
    3
}

fn default_poll_interval_ms() -> u64 {
    800
}

fn default_aggregation_interval_secs() -> u64 {
    20
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

fn default_show_progress() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            queue_capacity: None,
            partitions: default_partitions(),
            poll_interval_ms: default_poll_interval_ms(),
            aggregation_interval_secs: default_aggregation_interval_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            mode: RunMode::default(),
            show_progress: default_show_progress(),
        }
    }
}

impl RuntimeConfig {
    /// 📬 Explicit capacity if configured, otherwise `worker_count * 200`. Never zero.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or_else(|| self.worker_count.saturating_mul(QUEUE_SLOTS_PER_WORKER))
            .max(1)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn aggregation_interval(&self) -> Duration {
        Duration::from_secs(self.aggregation_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl AppConfig {
    /// 🚧 Reject the configs that would start and then do nothing forever (or divide by zero).
    pub fn validate(&self) -> anyhow::Result<()> {
        let runtime = &self.runtime;
        anyhow::ensure!(runtime.worker_count > 0, "💀 runtime.worker_count must be at least 1");
        anyhow::ensure!(runtime.partitions > 0, "💀 runtime.partitions must be at least 1");
        anyhow::ensure!(
            runtime.queue_capacity != Some(0),
            "💀 runtime.queue_capacity of 0 would block the first send forever"
        );
        anyhow::ensure!(runtime.poll_interval_ms > 0, "💀 runtime.poll_interval_ms must be positive");
        anyhow::ensure!(
            runtime.aggregation_interval_secs > 0,
            "💀 runtime.aggregation_interval_secs must be positive"
        );
        anyhow::ensure!(
            self.archive.start <= self.archive.end,
            "💀 archive.start ({}) is after archive.end ({}). Time only goes one way here.",
            self.archive.start,
            self.archive.end
        );
        Ok(())
    }

    /// 📅 The configured archive days as a walkable range.
    pub fn bucket_range(&self) -> BucketRange {
        BucketRange::new(self.archive.start, self.archive.end)
    }
}

/// 🚀 Load the config from `GHX_*` env vars and an optional TOML file (TOML wins).
///
/// Nested keys use `__`: `GHX_RUNTIME__WORKER_COUNT=64`. Validation is left to the caller,
/// who still has CLI overrides to apply first.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("GHX_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (GHX_*). \
             The file exists in our hearts, but apparently not on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (GHX_*). \
                 No file was provided, this one's all on the environment."
            .to_string(),
    };

    config.extract().context(context_msg)
}
