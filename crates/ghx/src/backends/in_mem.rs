//! # Previously, on GHX...
//!
//! 🎬 The cluster was down. The DBA was on a plane. Someone still needed to know
//! whether 250 events in meant 250 events stored. Enter: a store that lives
//! entirely in RAM, gone the moment you blink.
//!
//! `in_mem` provides the in-memory [`EventStore`] and its [`Partition`]s. Events
//! are sharded by `event_id % partitions`, exactly like the real thing shards by
//! key, and each shard carries its own aggregation cursor with the same rules
//! the server-side procedure follows: fold `[cursor + 1, max id]`, move the
//! cursor, report the count, never go backwards.
//!
//! 🦆
//!
//! ⚠️ Selected with `[store.InMemory]`. Great for tests and dry runs. If you're
//! deploying this to prod, please also deploy a therapist.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::backends::{EventStore, Partition};
use crate::common::EventRecord;
use crate::errors::GhxError;

/// 📦 One stored row. What `github_events` would hold: repo id and the payload text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StoredEvent {
    pub(crate) repo_id: u64,
    pub(crate) payload: String,
}

/// 🧊 One shard: its events, its cursor, and the aggregates derived so far.
#[derive(Debug, Default)]
struct Shard {
    events: BTreeMap<u64, StoredEvent>,
    /// 🏁 last aggregated id, starts at 0
    cursor: u64,
    /// 📊 derived aggregate: events folded per repo
    events_by_repo: BTreeMap<u64, u64>,
    /// 💣 test hook: how many upcoming aggregation calls should fail
    failures_queued: u32,
}

/// 🧠 A store that never forgets. Unlike my dad, who forgot my soccer game in 1998.
///
/// Clone-able because tests need to peek inside after handing a copy off to the
/// pipeline. The `Arc`s mean everyone shares the same shards.
#[derive(Debug, Clone)]
pub(crate) struct InMemoryStore {
    shards: Arc<Vec<Mutex<Shard>>>,
    insert_calls: Arc<AtomicU64>,
    poisoned_ids: Arc<Mutex<HashSet<u64>>>,
    /// 💥 ids whose insert panics the worker outright
    #[cfg(test)]
    booby_trapped: Arc<Mutex<HashSet<u64>>>,
    /// 🚪 inserts take a read guard, tests hold the write side to stall every worker
    #[cfg(test)]
    door: Arc<tokio::sync::RwLock<()>>,
}

impl InMemoryStore {
    /// 🚀 `partitions` shards, at least one. Nobody gets to divide by zero today.
    pub(crate) fn new(partitions: usize) -> Self {
        let shards = (0..partitions.max(1))
            .map(|_| Mutex::new(Shard::default()))
            .collect();
        Self {
            shards: Arc::new(shards),
            insert_calls: Arc::new(AtomicU64::new(0)),
            poisoned_ids: Arc::new(Mutex::new(HashSet::new())),
            #[cfg(test)]
            booby_trapped: Arc::new(Mutex::new(HashSet::new())),
            #[cfg(test)]
            door: Arc::new(tokio::sync::RwLock::new(())),
        }
    }

    fn slot_for(&self, event_id: u64) -> usize {
        (event_id % self.shards.len() as u64) as usize
    }

    /// 🧮 One `InMemoryPartition` per shard, indexed from 1 like backend nodes are.
    pub(crate) fn partitions(&self) -> Vec<InMemoryPartition> {
        (0..self.shards.len())
            .map(|slot| InMemoryPartition {
                index: slot + 1,
                slot,
                shards: Arc::clone(&self.shards),
            })
            .collect()
    }

    /// 📞 Every `upsert_ignore` call ever made, duplicates and failures included.
    #[cfg(test)]
    pub(crate) fn insert_calls(&self) -> u64 {
        self.insert_calls.load(Ordering::Relaxed)
    }

    /// 📏 Distinct events stored across all shards.
    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        let mut total = 0;
        for shard in self.shards.iter() {
            total += shard.lock().await.events.len();
        }
        total
    }

    /// 📸 Everything stored, keyed by event id. For comparing states.
    #[cfg(test)]
    pub(crate) async fn snapshot(&self) -> BTreeMap<u64, StoredEvent> {
        let mut all = BTreeMap::new();
        for shard in self.shards.iter() {
            let shard = shard.lock().await;
            all.extend(shard.events.iter().map(|(id, ev)| (*id, ev.clone())));
        }
        all
    }

    /// 💣 Make every insert of `event_id` fail, to prove one bad row doesn't stop a worker.
    #[cfg(test)]
    pub(crate) async fn poison(&self, event_id: u64) {
        self.poisoned_ids.lock().await.insert(event_id);
    }

    /// 💥 Make the worker that inserts `event_id` panic.
    #[cfg(test)]
    pub(crate) async fn booby_trap(&self, event_id: u64) {
        self.booby_trapped.lock().await.insert(event_id);
    }

    /// 🚪 Every insert waits until the returned guard is dropped.
    #[cfg(test)]
    pub(crate) async fn hold_inserts(&self) -> tokio::sync::OwnedRwLockWriteGuard<()> {
        Arc::clone(&self.door).write_owned().await
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn provision(&self) -> Result<()> {
        // ✅ RAM is always provisioned. That's the whole pitch.
        Ok(())
    }

    async fn upsert_ignore(&self, record: &EventRecord) -> Result<(), GhxError> {
        #[cfg(test)]
        let _door = self.door.read().await;
        #[cfg(test)]
        if self.booby_trapped.lock().await.contains(&record.event_id) {
            panic!("💥 event {} was booby-trapped", record.event_id);
        }
        self.insert_calls.fetch_add(1, Ordering::Relaxed);
        if self.poisoned_ids.lock().await.contains(&record.event_id) {
            return Err(GhxError::Insert {
                event_id: record.event_id,
                reason: "poisoned id".to_string(),
            });
        }

        let mut shard = self.shards[self.slot_for(record.event_id)].lock().await;
        // 🔒 first writer wins, later duplicates are a no-op
        shard
            .events
            .entry(record.event_id)
            .or_insert_with(|| StoredEvent {
                repo_id: record.repo_id,
                payload: record.payload.get().to_string(),
            });
        Ok(())
    }
}

/// 🧮 A handle on one in-memory shard's aggregation.
#[derive(Debug, Clone)]
pub(crate) struct InMemoryPartition {
    index: usize,
    slot: usize,
    shards: Arc<Vec<Mutex<Shard>>>,
}

impl InMemoryPartition {
    /// 🏁 Where this shard's aggregation has got to.
    #[cfg(test)]
    pub(crate) async fn cursor(&self) -> u64 {
        self.shards[self.slot].lock().await.cursor
    }

    /// 📊 How many events of `repo_id` this shard has folded so far.
    #[cfg(test)]
    pub(crate) async fn aggregated_for_repo(&self, repo_id: u64) -> u64 {
        self.shards[self.slot]
            .lock()
            .await
            .events_by_repo
            .get(&repo_id)
            .copied()
            .unwrap_or(0)
    }

    /// 💣 Make the next aggregation call on this shard fail.
    #[cfg(test)]
    pub(crate) async fn fail_next_call(&self) {
        self.shards[self.slot].lock().await.failures_queued += 1;
    }
}

#[async_trait]
impl Partition for InMemoryPartition {
    fn index(&self) -> usize {
        self.index
    }

    async fn aggregate(&self) -> Result<u64> {
        let mut shard = self.shards[self.slot].lock().await;
        if shard.failures_queued > 0 {
            shard.failures_queued -= 1;
            anyhow::bail!(
                "💀 partition {} refused to aggregate (the lock table is on fire)",
                self.index
            );
        }

        let Some(&end) = shard.events.keys().next_back() else {
            return Ok(0);
        };
        let start = shard.cursor.saturating_add(1);
        if start > end {
            return Ok(0);
        }

        let mut folded = 0u64;
        let mut per_repo: BTreeMap<u64, u64> = BTreeMap::new();
        for event in shard.events.range(start..=end).map(|(_, ev)| ev) {
            *per_repo.entry(event.repo_id).or_default() += 1;
            folded += 1;
        }
        for (repo_id, count) in per_repo {
            *shard.events_by_repo.entry(repo_id).or_default() += count;
        }
        shard.cursor = end;
        Ok(folded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::value::RawValue;

    pub(crate) fn record(event_id: u64, repo_id: u64) -> EventRecord {
        EventRecord {
            event_id,
            repo_id,
            payload: RawValue::from_string(format!(
                r#"{{"id":"{event_id}","repo":{{"id":{repo_id}}}}}"#
            ))
            .expect("💀 test payload is valid JSON"),
        }
    }

    #[tokio::test]
    async fn the_one_where_inserting_twice_is_the_same_as_once() {
        let once = InMemoryStore::new(3);
        let twice = InMemoryStore::new(3);
        for id in 1..=10 {
            once.upsert_ignore(&record(id, 1)).await.expect("💀 insert");
            twice.upsert_ignore(&record(id, 1)).await.expect("💀 insert");
            twice.upsert_ignore(&record(id, 1)).await.expect("💀 duplicate is fine");
        }
        assert_eq!(once.snapshot().await, twice.snapshot().await);
        assert_eq!(twice.insert_calls(), 20);
        assert_eq!(twice.len().await, 10);
    }

    #[tokio::test]
    async fn the_one_where_a_duplicate_does_not_overwrite_the_first_write() {
        let store = InMemoryStore::new(1);
        store.upsert_ignore(&record(7, 1)).await.expect("💀 insert");
        store.upsert_ignore(&record(7, 2)).await.expect("💀 duplicate");
        let snapshot = store.snapshot().await;
        assert_eq!(snapshot[&7].repo_id, 1);
    }

    #[tokio::test]
    async fn the_one_where_events_land_in_their_key_partition() {
        let store = InMemoryStore::new(3);
        for id in 1..=9 {
            store.upsert_ignore(&record(id, 1)).await.expect("💀 insert");
        }
        let partitions = store.partitions();
        assert_eq!(partitions.len(), 3);
        // 🧮 ids 3,6,9 → slot 0; 1,4,7 → slot 1; 2,5,8 → slot 2
        assert_eq!(partitions[0].aggregate().await.expect("💀"), 3);
        assert_eq!(partitions[0].cursor().await, 9);
        assert_eq!(partitions[1].aggregate().await.expect("💀"), 3);
        assert_eq!(partitions[1].cursor().await, 7);
    }

    #[tokio::test]
    async fn the_one_where_the_cursor_only_moves_forward_and_rerun_is_zero() {
        let store = InMemoryStore::new(1);
        let partition = store.partitions().remove(0);
        assert_eq!(partition.cursor().await, 0, "cursor starts at zero");
        assert_eq!(partition.aggregate().await.expect("💀"), 0, "empty shard");

        for id in [5, 10, 15] {
            store.upsert_ignore(&record(id, 42)).await.expect("💀 insert");
        }
        let t1 = partition.cursor().await;
        assert_eq!(partition.aggregate().await.expect("💀"), 3);
        let t2 = partition.cursor().await;
        assert_eq!(partition.aggregate().await.expect("💀"), 0, "nothing new");
        let t3 = partition.cursor().await;

        assert!(t1 <= t2 && t2 <= t3);
        assert_eq!(t2, 15, "cursor stops at the largest id present");
        assert_eq!(t3, t2);
        assert_eq!(partition.aggregated_for_repo(42).await, 3);
    }

    #[tokio::test]
    async fn the_one_where_a_failed_call_is_caught_up_next_time() {
        let store = InMemoryStore::new(1);
        let partition = store.partitions().remove(0);
        for id in 1..=4 {
            store.upsert_ignore(&record(id, 1)).await.expect("💀 insert");
        }
        partition.fail_next_call().await;
        assert!(partition.aggregate().await.is_err());
        assert_eq!(partition.cursor().await, 0, "a failed call moves nothing");
        assert_eq!(partition.aggregate().await.expect("💀 retry"), 4);
        assert_eq!(partition.cursor().await, 4);
    }

    #[tokio::test]
    async fn the_one_where_poisoned_ids_fail_loudly_and_alone() {
        let store = InMemoryStore::new(2);
        store.poison(3).await;
        assert!(matches!(
            store.upsert_ignore(&record(3, 1)).await,
            Err(GhxError::Insert { event_id: 3, .. })
        ));
        store.upsert_ignore(&record(4, 1)).await.expect("💀 neighbours unaffected");
        assert_eq!(store.len().await, 1);
    }
}
