// ai
//! 📡 poller.rs: knock on the live feed every 800ms, politely, with our last ETag.
//!
//! 🧠 Knowledge graph:
//! - a `tokio::time::interval` drives the ticks. Each tick spawns one fetch into a
//!   `JoinSet` and immediately goes back to waiting. Fetches may overlap.
//! - a fetch hands its page straight back to the loop. The loop adopts the token first
//!   and only then spawns a delivery task to push the records onto the queue. A full
//!   queue stalls deliveries, never the token.
//! - the token lives in this loop and nowhere else. A returned token is adopted only if
//!   the request that produced it is newer than the one behind the current token, so a
//!   slow old response can never drag the token backwards.
//! - at most [`MAX_FETCHES_IN_FLIGHT`] fetches and [`MAX_PAGES_WAITING`] undelivered
//!   pages exist at once. A tick that would go past either is skipped.
//! - `304` is a shrug: no records, token unchanged.
//!
//! 🦆 Records from overlapping fetches arrive in whatever order they arrive. Inserts
//! ignore duplicates, so the database doesn't care and neither does the duck.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_channel::Sender;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::backends::{FeedPage, LiveFeed};
use crate::common::{EventRecord, QueueItem};

/// 🚦 A slow API gets this many concurrent requests and no more.
pub(crate) const MAX_FETCHES_IN_FLIGHT: usize = 4;
/// 🧱 Pages fetched but still waiting on a full queue. Past this, ticks are skipped.
pub(crate) const MAX_PAGES_WAITING: usize = 4;

/// 📋 What the poller did with its life.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct PollerReport {
    pub(crate) ticks: u64,
    pub(crate) skipped: u64,
    pub(crate) pages: u64,
    pub(crate) not_modified: u64,
    pub(crate) errors: u64,
    pub(crate) enqueued: u64,
    pub(crate) token: Option<String>,
}

/// 🏷️ The current validation token and the request number that produced it.
#[derive(Debug, Default)]
struct TokenState {
    seq: u64,
    token: Option<String>,
}

impl TokenState {
    /// 🔒 Newer requests win. Older ones are ignored, however late they show up.
    fn offer(&mut self, seq: u64, token: String) -> bool {
        if seq > self.seq {
            self.seq = seq;
            self.token = Some(token);
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
pub(crate) struct LivePoller<F> {
    feed: Arc<F>,
    interval: Duration,
    cancel: CancellationToken,
}

impl<F: LiveFeed + 'static> LivePoller<F> {
    pub(crate) fn new(feed: F, interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            feed: Arc::new(feed),
            interval,
            cancel,
        }
    }

    /// 🔁 Poll until cancelled, feeding `sender`.
    pub(crate) async fn run(&self, sender: Sender<QueueItem>) -> PollerReport {
        let mut report = PollerReport::default();
        let mut token = TokenState::default();
        let mut fetches: JoinSet<(u64, Result<FeedPage>)> = JoinSet::new();
        let mut deliveries: JoinSet<Result<u64>> = JoinSet::new();
        let mut next_seq = 0u64;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                Some(joined) = fetches.join_next() => {
                    let Ok((seq, fetched)) = joined else {
                        report.errors += 1;
                        continue;
                    };
                    match fetched {
                        Ok(FeedPage::NotModified) => report.not_modified += 1,
                        Ok(FeedPage::Page { records, token: fresh }) => {
                            report.pages += 1;
                            if let Some(fresh) = fresh {
                                if !token.offer(seq, fresh) {
                                    trace!(seq, current = token.seq, "🏷️ stale token ignored");
                                }
                            }
                            let sender = sender.clone();
                            let cancel = self.cancel.clone();
                            deliveries.spawn(async move { deliver(records, &sender, &cancel).await });
                        }
                        Err(e) => {
                            report.errors += 1;
                            warn!(seq, error = %format!("{e:#}"), "📡 live fetch failed");
                        }
                    }
                }
                Some(joined) = deliveries.join_next() => {
                    match joined {
                        Ok(Ok(enqueued)) => report.enqueued += enqueued,
                        Ok(Err(e)) => {
                            report.errors += 1;
                            warn!(error = %format!("{e:#}"), "📡 live delivery failed");
                        }
                        Err(_) => report.errors += 1,
                    }
                }
                _ = ticker.tick() => {
                    report.ticks += 1;
                    if fetches.len() >= MAX_FETCHES_IN_FLIGHT || deliveries.len() >= MAX_PAGES_WAITING {
                        report.skipped += 1;
                        trace!(
                            fetching = fetches.len(),
                            waiting = deliveries.len(),
                            "🧱 poller is backed up, skipping a tick"
                        );
                        continue;
                    }
                    next_seq += 1;
                    let seq = next_seq;
                    let feed = Arc::clone(&self.feed);
                    let current = token.token.clone();
                    fetches.spawn(async move { (seq, feed.fetch(current.as_deref()).await) });
                }
            }
        }

        fetches.abort_all();
        deliveries.abort_all();
        while fetches.join_next().await.is_some() {}
        while deliveries.join_next().await.is_some() {}
        report.token = token.token;
        debug!(
            ticks = report.ticks,
            skipped = report.skipped,
            pages = report.pages,
            not_modified = report.not_modified,
            errors = report.errors,
            enqueued = report.enqueued,
            token = ?report.token,
            "📡 poller clocked out"
        );
        report
    }
}

/// 📤 Push one page onto the queue, waiting as long as the queue says to.
async fn deliver(
    records: Vec<EventRecord>,
    sender: &Sender<QueueItem>,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut enqueued = 0;
    for record in records {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = sender.send(QueueItem::Record(record)) => {
                if sent.is_err() {
                    anyhow::bail!("💀 the insertion queue closed under the poller");
                }
                enqueued += 1;
            }
        }
    }
    Ok(enqueued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::value::RawValue;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn record(event_id: u64) -> EventRecord {
        EventRecord {
            event_id,
            repo_id: 1,
            payload: RawValue::from_string(format!(r#"{{"id":"{event_id}"}}"#))
                .expect("💀 valid JSON"),
        }
    }

    /// 🎭 A feed that plays back a script, one line per call, and writes down every token
    /// it was handed. Past the end of the script it serves its standing page until shown
    /// that page's token, and `NotModified` after that (or straight away, with no page).
    #[derive(Debug, Default)]
    struct ScriptedFeed {
        script: Mutex<VecDeque<(Duration, Result<FeedPage, String>)>>,
        standing: Option<(Vec<u64>, String)>,
        tokens_seen: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedFeed {
        fn then(self, delay: Duration, page: Result<FeedPage, String>) -> Self {
            self.script
                .lock()
                .expect("💀 script lock")
                .push_back((delay, page));
            self
        }

        fn until_seen(mut self, ids: &[u64], token: &str) -> Self {
            self.standing = Some((ids.to_vec(), token.to_string()));
            self
        }
    }

    #[async_trait]
    impl LiveFeed for ScriptedFeed {
        async fn fetch(&self, token: Option<&str>) -> Result<FeedPage> {
            self.tokens_seen
                .lock()
                .expect("💀 token lock")
                .push(token.map(str::to_string));
            let next = self.script.lock().expect("💀 script lock").pop_front();
            match next {
                Some((delay, page)) => {
                    tokio::time::sleep(delay).await;
                    page.map_err(anyhow::Error::msg)
                }
                None => match &self.standing {
                    Some((ids, etag)) if token != Some(etag.as_str()) => {
                        page(ids, etag).map_err(anyhow::Error::msg)
                    }
                    _ => Ok(FeedPage::NotModified),
                },
            }
        }
    }

    fn page(ids: &[u64], token: &str) -> Result<FeedPage, String> {
        Ok(FeedPage::Page {
            records: ids.iter().copied().map(record).collect(),
            token: Some(token.to_string()),
        })
    }

    /// ⏩ Run a poller for `how_long` against a queue of `capacity` that nobody drains.
    async fn poll_for(
        feed: ScriptedFeed,
        capacity: usize,
        how_long: Duration,
    ) -> (PollerReport, Vec<Option<String>>, usize) {
        let cancel = CancellationToken::new();
        let poller = Arc::new(LivePoller::new(feed, Duration::from_millis(800), cancel.clone()));
        let (tx, rx) = async_channel::bounded(capacity);

        let running = tokio::spawn({
            let poller = Arc::clone(&poller);
            async move { poller.run(tx).await }
        });
        tokio::time::sleep(how_long).await;
        cancel.cancel();
        let report = running.await.expect("💀 poller panicked");

        let tokens = poller.feed.tokens_seen.lock().expect("💀 token lock").clone();
        (report, tokens, rx.len())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_etag_is_threaded_between_ticks() {
        let feed = ScriptedFeed::default()
            .then(Duration::ZERO, page(&[1, 2], "\"a\""))
            .then(Duration::ZERO, Ok(FeedPage::NotModified))
            .then(Duration::ZERO, page(&[3], "\"b\""));

        // ⏩ ticks at 0ms, 800ms, 1600ms, 2400ms
        let (report, tokens, queued) = poll_for(feed, 100, Duration::from_millis(2_500)).await;

        assert_eq!(report.ticks, 4);
        assert_eq!(
            tokens,
            vec![
                None,
                Some("\"a\"".to_string()),
                Some("\"a\"".to_string()),
                Some("\"b\"".to_string()),
            ],
            "304 leaves the token alone"
        );
        assert_eq!(report.enqueued, 3);
        assert_eq!(queued, 3);
        assert_eq!(report.not_modified, 2);
        assert_eq!(report.token.as_deref(), Some("\"b\""));
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_slow_old_response_cannot_rewind_the_token() {
        let feed = ScriptedFeed::default()
            .then(Duration::from_millis(2_000), page(&[1], "\"slow\""))
            .then(Duration::ZERO, page(&[2], "\"fast\""));

        // ⏩ seq 1 leaves at 0ms and lands at 2000ms. seq 2 leaves and lands at 800ms.
        let (report, tokens, queued) = poll_for(feed, 100, Duration::from_millis(2_500)).await;

        assert_eq!(tokens[2], Some("\"fast\"".to_string()));
        assert_eq!(report.token.as_deref(), Some("\"fast\""));
        assert_eq!(report.pages, 2);
        assert_eq!(queued, 2, "records from both pages are still delivered");
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_failed_fetch_is_logged_and_the_loop_keeps_going() {
        let feed = ScriptedFeed::default()
            .then(Duration::ZERO, Err("403 rate limited".to_string()))
            .then(Duration::ZERO, page(&[9], "\"c\""));

        let (report, _tokens, queued) = poll_for(feed, 100, Duration::from_millis(900)).await;
        assert_eq!(report.errors, 1);
        assert_eq!(report.pages, 1);
        assert_eq!(queued, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_full_queue_does_not_hide_the_etag() {
        let feed = ScriptedFeed::default().until_seen(&[1, 2, 3, 4, 5], "\"v1\"");

        // ⏩ 11 ticks. The first page gets 2 of its 5 records in and then waits forever.
        let (report, tokens, queued) = poll_for(feed, 2, Duration::from_millis(8_500)).await;

        assert_eq!(tokens.len(), 11);
        assert_eq!(tokens[0], None);
        assert!(
            tokens[1..].iter().all(|t| t.as_deref() == Some("\"v1\"")),
            "every request after the first carries the token: {tokens:?}"
        );
        assert_eq!(report.pages, 1);
        assert_eq!(report.not_modified, 10);
        assert_eq!(report.token.as_deref(), Some("\"v1\""));
        assert_eq!(queued, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_backed_up_queue_stops_the_fetching() {
        let feed = (1..=11u64).fold(ScriptedFeed::default(), |feed, n| {
            let ids = [n * 10, n * 10 + 1, n * 10 + 2];
            feed.then(Duration::ZERO, page(&ids, &format!("v{n}")))
        });

        let (report, tokens, queued) = poll_for(feed, 1, Duration::from_millis(8_500)).await;

        assert_eq!(report.ticks, 11);
        assert_eq!(tokens.len(), MAX_PAGES_WAITING, "one fetch per page the queue can't take yet");
        assert_eq!(report.skipped, 11 - MAX_PAGES_WAITING as u64);
        assert_eq!(report.pages, MAX_PAGES_WAITING as u64);
        assert_eq!(report.token, Some(format!("v{MAX_PAGES_WAITING}")));
        assert_eq!(queued, 1);
    }

    #[test]
    fn the_one_where_only_newer_requests_get_to_set_the_token() {
        let mut state = TokenState::default();
        assert!(state.offer(2, "two".into()));
        assert!(!state.offer(1, "one".into()));
        assert!(!state.offer(2, "two again".into()));
        assert!(state.offer(5, "five".into()));
        assert_eq!(state.token.as_deref(), Some("five"));
    }
}
