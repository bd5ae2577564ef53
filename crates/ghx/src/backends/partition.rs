use anyhow::Result;
use async_trait::async_trait;

use crate::backends::{in_mem, mysql};

/// 🧮 One backend shard and its server-side aggregation.
///
/// # Contract 📜
/// - `aggregate` is zero-argument and re-invocable. Each call folds the id range
///   `[cursor + 1, max id in this shard]` into the derived tables, moves the cursor to the
///   end of that range, and returns how many records it aggregated.
/// - No new records since last time means `Ok(0)` and an unchanged cursor.
/// - A failed call leaves the cursor where it was, so the next tick catches up.
/// - The cursor only moves forward, and never past the largest id actually in the shard.
#[async_trait]
pub(crate) trait Partition: std::fmt::Debug + Send + Sync {
    /// 🏷️ 1-based, matching the backend node naming.
    fn index(&self) -> usize;
    /// 🔄 Run one aggregation pass and report the newly aggregated count.
    async fn aggregate(&self) -> Result<u64>;
}

/// 🎭 Partition dispatch. Mirrors `StoreBackend`.
#[derive(Debug)]
pub(crate) enum PartitionBackend {
    InMemory(in_mem::InMemoryPartition),
    Mysql(mysql::MysqlPartition),
}

#[async_trait]
impl Partition for PartitionBackend {
    fn index(&self) -> usize {
        match self {
            PartitionBackend::InMemory(p) => p.index(),
            PartitionBackend::Mysql(p) => p.index(),
        }
    }

    async fn aggregate(&self) -> Result<u64> {
        match self {
            PartitionBackend::InMemory(p) => p.aggregate().await,
            PartitionBackend::Mysql(p) => p.aggregate().await,
        }
    }
}
