use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::backends::{in_mem, mysql};
use crate::common::EventRecord;
use crate::errors::GhxError;

/// 🗄️ The primary store: where every decoded event goes to live forever (or until `drop_data`).
///
/// # Contract 📜
/// - `provision` runs once at startup. Failing it is fatal. Nothing else is.
/// - `upsert_ignore` is keyed by `event_id` and MUST treat a duplicate as success.
///   Same event twice = same state as once. The workers insert in any order, so this
///   is the thing that makes "any order" fine.
/// - Shared by every insertion worker at once: `&self`, no `&mut`, pool inside.
#[async_trait]
pub(crate) trait EventStore: std::fmt::Debug + Send + Sync {
    /// 🏗️ Make sure the storage objects exist. Called before the pipeline starts.
    async fn provision(&self) -> Result<()>;
    /// 📥 Insert one event, silently ignoring a duplicate id.
    async fn upsert_ignore(&self, record: &EventRecord) -> Result<(), GhxError>;
}

/// 🔧 Which store to talk to. Externally tagged, so TOML reads `[store.Mysql]` or `[store.InMemory]`.
#[derive(Debug, Deserialize, Clone)]
pub enum StoreConfig {
    /// 🧠 RAM only, partitioned by `event_id % runtime.partitions`. Tests and dry runs.
    InMemory {},
    /// 🐬 A MySQL/MariaDB frontend (Spider) plus one connection per backend node.
    Mysql(mysql::MysqlStoreConfig),
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::InMemory {}
    }
}

/// 🎭 The many faces of a store. Enum dispatch, same as everywhere else in here.
#[derive(Debug)]
pub(crate) enum StoreBackend {
    InMemory(in_mem::InMemoryStore),
    Mysql(mysql::MysqlStore),
}

#[async_trait]
impl EventStore for StoreBackend {
    async fn provision(&self) -> Result<()> {
        match self {
            StoreBackend::InMemory(store) => store.provision().await,
            StoreBackend::Mysql(store) => store.provision().await,
        }
    }

    async fn upsert_ignore(&self, record: &EventRecord) -> Result<(), GhxError> {
        match self {
            StoreBackend::InMemory(store) => store.upsert_ignore(record).await,
            StoreBackend::Mysql(store) => store.upsert_ignore(record).await,
        }
    }
}
