//! 🎬 *[a queue fills with events. somewhere, a database waits.]*
//! *[the clock on the wall reads 2:47am.]*
//!
//! 🗄️ The InsertWorker: patient, tireless, and deeply unbothered by the chaos upstream.
//! It dequeues. It inserts. A failed insert gets a `warn!` and the worker moves on, because
//! one cursed row is not a reason to stop ingesting the other nine hundred million.
//!
//! It goes home on exactly three occasions: it drew a sentinel, the queue closed, or the
//! cancellation token fired while it was waiting for work. An insert already in flight
//! always gets to finish.

use std::sync::Arc;

use async_channel::Receiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Worker;
use crate::backends::{EventStore, StoreBackend};
use crate::common::QueueItem;

/// 📋 What one worker reports when it clocks out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorkerReport {
    pub(crate) inserted: u64,
    pub(crate) failed: u64,
    /// 🚦 true only if the worker left because it drew its sentinel
    pub(crate) saw_sentinel: bool,
}

#[derive(Debug)]
pub(crate) struct InsertWorker {
    id: usize,
    rx: Receiver<QueueItem>,
    store: Arc<StoreBackend>,
    cancel: CancellationToken,
}

impl InsertWorker {
    pub(crate) fn new(
        id: usize,
        rx: Receiver<QueueItem>,
        store: Arc<StoreBackend>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            rx,
            store,
            cancel,
        }
    }
}

impl Worker for InsertWorker {
    type Report = WorkerReport;

    fn start(self) -> JoinHandle<WorkerReport> {
        tokio::spawn(async move {
            let mut report = WorkerReport::default();
            loop {
                let next = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        debug!(worker = self.id, "🛑 cancelled while waiting for work");
                        break;
                    }
                    next = self.rx.recv() => next,
                };

                match next {
                    Ok(QueueItem::Record(record)) => {
                        match self.store.upsert_ignore(&record).await {
                            Ok(()) => report.inserted += 1,
                            Err(e) => {
                                warn!(worker = self.id, error = %e, "🗄️ insert failed, moving on");
                                report.failed += 1;
                            }
                        }
                    }
                    Ok(QueueItem::Sentinel) => {
                        report.saw_sentinel = true;
                        debug!(worker = self.id, inserted = report.inserted, "🏁 sentinel drawn, clocking out");
                        break;
                    }
                    Err(_) => {
                        debug!(worker = self.id, "🏁 queue closed and empty, clocking out");
                        break;
                    }
                }
            }
            report
        })
    }
}
