//! 🔌 Backends: where the real I/O happens.
//!
//! 🗜️ The archive hands us hours, 📡 the feed hands us the present, 🗄️ the store keeps
//! everything, and 🧮 the partitions crunch what the store keeps. Everything in here talks
//! to something outside the process. Everything outside this module talks to traits.
//!
//! 🎭 Store and partitions are picked by config at runtime, so they go through enum
//! dispatch (`StoreBackend`, `PartitionBackend`). The archive and the feed are picked by
//! whoever builds the supervisor, so they stay generic.
//!
//! 🦆 The duck is here because every file must have one. This is law. Do not question the duck.

use anyhow::Result;
use tracing::info;

use crate::app_config::AppConfig;
use crate::errors::GhxError;

pub mod archive;
pub mod feed;
pub(crate) mod in_mem;
pub(crate) mod mysql;
pub(crate) mod partition;
pub(crate) mod store;

// 🎯 Re-exports so callers can say `backends::EventStore` instead of spelunking.
pub use archive::{ArchiveConfig, ArchiveSource, CachedHttpArchive, FetchOutcome, InMemoryArchive};
pub use feed::{FeedConfig, FeedPage, GitHubEventsFeed, LiveFeed};
pub use mysql::MysqlStoreConfig;
pub(crate) use partition::{Partition, PartitionBackend};
pub(crate) use store::{EventStore, StoreBackend};
pub use store::StoreConfig;

/// 🔗 Open the configured store and one handle per partition, then provision.
///
/// Every failure in here is a [`GhxError::FatalStartup`]: if we can't reach the store or
/// it doesn't have what we need, nothing downstream is worth starting.
pub(crate) async fn connect(config: &AppConfig) -> Result<(StoreBackend, Vec<PartitionBackend>)> {
    let fatal = |e: anyhow::Error| GhxError::FatalStartup(format!("{e:#}"));
    let wanted = config.runtime.partitions;

    let (store, partitions) = match &config.store {
        StoreConfig::InMemory {} => {
            let store = in_mem::InMemoryStore::new(wanted);
            let partitions = store
                .partitions()
                .into_iter()
                .map(PartitionBackend::InMemory)
                .collect();
            (StoreBackend::InMemory(store), partitions)
        }
        StoreConfig::Mysql(mysql_config) => {
            if mysql_config.backend_urls.len() != wanted {
                return Err(GhxError::FatalStartup(format!(
                    "runtime.partitions is {wanted} but {} backend URLs are configured",
                    mysql_config.backend_urls.len()
                ))
                .into());
            }
            let (store, partitions) =
                mysql::MysqlStore::connect(mysql_config, config.runtime.worker_count)
                    .await
                    .map_err(fatal)?;
            let partitions = partitions.into_iter().map(PartitionBackend::Mysql).collect();
            (StoreBackend::Mysql(store), partitions)
        }
    };

    store.provision().await.map_err(fatal)?;
    info!(partitions = wanted, "🔗 store connected and provisioned");
    Ok((store, partitions))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_in_memory_gets_one_partition_per_backend() {
        let mut config = AppConfig::default();
        config.runtime.partitions = 4;
        let (_store, partitions) = connect(&config).await.expect("💀 RAM never refuses");
        let indexes: Vec<usize> = partitions.iter().map(|p| p.index()).collect();
        assert_eq!(indexes, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn the_one_where_backend_count_mismatch_is_fatal_before_any_connection() {
        let mut config = AppConfig::default();
        config.runtime.partitions = 3;
        config.store = StoreConfig::Mysql(MysqlStoreConfig {
            frontend_url: "mysql://nobody@127.0.0.1:1".to_string(),
            backend_urls: vec!["mysql://nobody@127.0.0.1:1".to_string()],
            database: "github".to_string(),
            drop_data: false,
        });
        let err = connect(&config).await.expect_err("💀 1 != 3");
        let ghx = err.downcast_ref::<GhxError>().expect("💀 typed error");
        assert!(ghx.is_fatal());
    }
}
