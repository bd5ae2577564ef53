// ai
//! 📬 pool.rs: the bounded queue and the workers that drain it.
//!
//! 🧠 Knowledge graph:
//! - one `async_channel::bounded(capacity)`, MPMC. Producers `send().await` and sit there
//!   when it's full. That wait is the only backpressure in the whole pipeline.
//! - `workers` `InsertWorker`s share the receiving end.
//! - `finish()` = one `Sentinel` per worker, then wait for every worker to come home.
//!   It returns only once every worker has clocked out, so "finished" means drained.
//! - `abort()` = close the queue and collect whoever is still around. For after cancellation.
//!
//! 🦆 The pool does not hold a receiver itself. If every worker is gone, sends fail fast
//! instead of hanging on a queue nobody will ever read.

use std::sync::Arc;

use async_channel::Sender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::app_config::RuntimeConfig;
use crate::backends::StoreBackend;
use crate::common::QueueItem;
use crate::supervisors::workers::{InsertWorker, Worker, WorkerReport};

/// ⚙️ The pool's shape, lifted out of `RuntimeConfig` once.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PoolSettings {
    pub(crate) workers: usize,
    pub(crate) capacity: usize,
    pub(crate) show_progress: bool,
}

impl PoolSettings {
    pub(crate) fn from_runtime(runtime: &RuntimeConfig) -> Self {
        Self {
            workers: runtime.worker_count.max(1),
            capacity: runtime.queue_capacity(),
            show_progress: runtime.show_progress,
        }
    }
}

/// 📋 Totals for one pool's whole life.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PoolReport {
    pub(crate) workers: usize,
    pub(crate) sentinels_sent: usize,
    pub(crate) sentinels_observed: usize,
    pub(crate) inserted: u64,
    pub(crate) failed: u64,
}

impl PoolReport {
    /// ✅ Every worker drew exactly its own sentinel.
    pub(crate) fn fully_drained(&self) -> bool {
        self.sentinels_sent == self.workers && self.sentinels_observed == self.workers
    }
}

#[derive(Debug)]
pub(crate) struct InsertionPool {
    tx: Sender<QueueItem>,
    handles: Vec<JoinHandle<WorkerReport>>,
    cancel: CancellationToken,
}

impl InsertionPool {
    /// 🚀 Open the queue and spawn the workers.
    pub(crate) fn start(
        workers: usize,
        capacity: usize,
        store: Arc<StoreBackend>,
        cancel: CancellationToken,
    ) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = async_channel::bounded(capacity.max(1));
        let handles = (0..workers)
            .map(|id| InsertWorker::new(id, rx.clone(), Arc::clone(&store), cancel.clone()).start())
            .collect();
        debug!(workers, capacity, "🧵 insertion pool started");
        Self {
            tx,
            handles,
            cancel,
        }
    }

    /// 📤 The producer end. Clone it as often as you like.
    pub(crate) fn sender(&self) -> Sender<QueueItem> {
        self.tx.clone()
    }

    /// 🏁 One sentinel per worker, then wait for all of them.
    pub(crate) async fn finish(self) -> PoolReport {
        let mut sentinels_sent = 0;
        for _ in 0..self.handles.len() {
            let sent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => false,
                sent = self.tx.send(QueueItem::Sentinel) => sent.is_ok(),
            };
            if !sent {
                break;
            }
            sentinels_sent += 1;
        }
        self.collect(sentinels_sent).await
    }

    /// 🛑 Close the queue and collect the workers. Queued records are abandoned.
    pub(crate) async fn abort(self) -> PoolReport {
        self.tx.close();
        self.collect(0).await
    }

    async fn collect(self, sentinels_sent: usize) -> PoolReport {
        let mut report = PoolReport {
            workers: self.handles.len(),
            sentinels_sent,
            ..PoolReport::default()
        };
        for handle in self.handles {
            match handle.await {
                Ok(worker) => {
                    report.inserted += worker.inserted;
                    report.failed += worker.failed;
                    report.sentinels_observed += usize::from(worker.saw_sentinel);
                }
                Err(e) => error!(error = %e, "💀 an insertion worker died without saying goodbye"),
            }
        }
        report
    }
}
