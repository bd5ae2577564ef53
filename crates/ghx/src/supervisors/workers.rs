//! 🧵 Workers: the ones who actually do the work while the Supervisor takes all the
//! credit in the sprint retro.
//!
//! ⚠️ "If you're reading this, the code review went poorly."

use tokio::task::JoinHandle;

pub(crate) mod insert_worker;
pub(crate) use insert_worker::{InsertWorker, WorkerReport};

/// 🏗️ A background worker, that does work. duh.
///
/// `start` consumes the worker and hands back the join handle, which resolves to whatever
/// the worker wants to tell its supervisor on the way out.
pub(crate) trait Worker {
    type Report: Send + 'static;

    /// 🚀 Spawn it. Returns a JoinHandle because we trust but verify. Mostly verify.
    fn start(self) -> JoinHandle<Self::Report>;
}
