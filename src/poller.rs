//! Background seat poller.
//!
//! One cycle lists every subscription, fetches each distinct (CRN, term) once,
//! and compares the `remaining` count with the last value seen for that key.
//! Differences become [`ChangeEvent`]s on a broadcast channel.
//!
//! ```text
//! Poller::run ── startup delay ──► cycle ── interval ──► cycle ── ...
//!                                    │
//!                                    ├─ store.list_all()       (error ⇒ empty set)
//!                                    ├─ fetch distinct keys    (bounded concurrency, per-fetch timeout)
//!                                    └─ tracker.observe(..)    (sequential, after all fetches)
//! ```
//!
//! Per-key fetch failures only skip that key for the cycle. Nothing that
//! happens inside a cycle stops the loop; only cancellation does.

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{stream, FutureExt, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::errors::FetchError;
use crate::persistence::SubscriptionStore;
use crate::services::provider::{fetch_with_timeout, AvailabilityProvider, ProviderRef};
use crate::state::course::{AvailabilityRecord, SubscriptionKey};
use crate::state::tracker::{ChangeEvent, ChangeTracker, Observation};

const EVENT_CAPACITY: usize = 256;

/// Summary of one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub subscriptions: usize,
    pub distinct_keys: usize,
    pub fetched: usize,
    pub failed: usize,
    pub changes: usize,
    /// Keys with a remembered seat count after this cycle.
    pub tracked_keys: usize,
    /// Set when the watchlist could not be read and the cycle ran on an empty set.
    pub store_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub report: CycleReport,
    pub events: Vec<ChangeEvent>,
}

/// Run one sweep over the current watchlist.
pub async fn run_cycle(
    cycle: u64,
    store: &dyn SubscriptionStore,
    provider: &dyn AvailabilityProvider,
    tracker: &mut ChangeTracker,
    fetch_timeout: Duration,
    max_concurrent_fetches: usize,
) -> CycleOutcome {
    let started_at = Utc::now();

    let (subscriptions, store_error) = match store.list_all().await {
        Ok(subs) => (subs, None),
        Err(e) => {
            tracing::warn!(cycle, "Watchlist unreadable, polling nothing this cycle: {e}");
            (Vec::new(), Some(e.to_string()))
        }
    };

    // Several subscribers may watch the same section; fetch it once.
    let keys: BTreeSet<SubscriptionKey> = subscriptions.iter().map(|s| s.key.clone()).collect();

    let mut results: Vec<(SubscriptionKey, Result<AvailabilityRecord, FetchError>)> =
        stream::iter(keys.iter().cloned())
            .map(|key| async move {
                let res = fetch_with_timeout(provider, &key, fetch_timeout).await;
                (key, res)
            })
            .buffer_unordered(max_concurrent_fetches.max(1))
            .collect()
            .await;
    results.sort_by(|a, b| a.0.cmp(&b.0));

    let mut events = Vec::new();
    let mut failed = 0;

    for (key, res) in results {
        let record = match res {
            Ok(record) => record,
            Err(e) => {
                failed += 1;
                tracing::warn!(cycle, %key, reason = e.as_label(), "Seat fetch failed: {e}");
                continue;
            }
        };

        match tracker.observe(&key, &record.remaining) {
            Observation::Baseline => {
                tracing::debug!(cycle, %key, remaining = %record.remaining, "Baseline recorded");
            }
            Observation::Unchanged => {}
            Observation::Changed { previous } => {
                tracing::info!(
                    cycle,
                    crn = key.crn(),
                    term = key.term(),
                    previous = %previous,
                    current = %record.remaining,
                    "Seat count changed for {}",
                    record.short_title()
                );
                events.push(ChangeEvent {
                    key,
                    previous: Some(previous),
                    current: record.remaining,
                    observed_at: Utc::now(),
                });
            }
        }
    }

    let report = CycleReport {
        cycle,
        started_at,
        finished_at: Utc::now(),
        subscriptions: subscriptions.len(),
        distinct_keys: keys.len(),
        fetched: keys.len() - failed,
        failed,
        changes: events.len(),
        tracked_keys: tracker.len(),
        store_error,
    };

    CycleOutcome { report, events }
}

/// Timing knobs for [`Poller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerSettings {
    pub startup_delay: Duration,
    /// Fixed delay between the end of one cycle and the start of the next.
    pub interval: Duration,
    pub fetch_timeout: Duration,
    pub max_concurrent_fetches: usize,
}

impl From<&AppConfig> for PollerSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            startup_delay: cfg.startup_delay(),
            interval: cfg.poll_interval(),
            fetch_timeout: cfg.fetch_timeout(),
            max_concurrent_fetches: cfg.max_concurrent_fetches,
        }
    }
}

/// Owns the change tracker and drives poll cycles.
pub struct Poller {
    store: Arc<dyn SubscriptionStore>,
    provider: ProviderRef,
    tracker: ChangeTracker,
    settings: PollerSettings,
    events: broadcast::Sender<ChangeEvent>,
    status: watch::Sender<Option<CycleReport>>,
    cycles: u64,
}

impl Poller {
    pub fn new(store: Arc<dyn SubscriptionStore>, provider: ProviderRef, settings: PollerSettings) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CAPACITY);
        let (status, _rx) = watch::channel(None);

        Self {
            store,
            provider,
            tracker: ChangeTracker::new(),
            settings,
            events,
            status,
            cycles: 0,
        }
    }

    /// Receive every change event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    /// Report of the most recently finished cycle.
    pub fn status(&self) -> watch::Receiver<Option<CycleReport>> {
        self.status.subscribe()
    }

    #[cfg(test)]
    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    /// Run one cycle, publish its events and report.
    ///
    /// A panic inside the cycle is logged and yields `None`.
    pub async fn poll_once(&mut self) -> Option<CycleOutcome> {
        self.cycles += 1;
        let cycle = self.cycles;

        let fut = run_cycle(
            cycle,
            self.store.as_ref(),
            self.provider.as_ref(),
            &mut self.tracker,
            self.settings.fetch_timeout,
            self.settings.max_concurrent_fetches,
        );

        let outcome = match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_panic) => {
                tracing::error!(cycle, "Poll cycle panicked; continuing with next cycle");
                return None;
            }
        };

        for event in &outcome.events {
            // No receivers is fine: events are best effort.
            let _ = self.events.send(event.clone());
        }

        let r = &outcome.report;
        tracing::info!(
            cycle,
            keys = r.distinct_keys,
            fetched = r.fetched,
            failed = r.failed,
            changes = r.changes,
            tracked = r.tracked_keys,
            "Poll cycle finished"
        );
        self.status.send_replace(Some(outcome.report.clone()));

        Some(outcome)
    }

    /// Drive exactly `n` cycles back to back, without any delay.
    #[cfg(test)]
    pub async fn run_cycles(&mut self, n: usize) -> Vec<CycleOutcome> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            if let Some(outcome) = self.poll_once().await {
                out.push(outcome);
            }
        }
        out
    }

    /// Poll until `cancel` fires: startup delay, then cycle / interval forever.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            "Starting poller: startup_delay={:?}, interval={:?}, fetch_timeout={:?}",
            self.settings.startup_delay,
            self.settings.interval,
            self.settings.fetch_timeout
        );

        if !sleep_or_cancel(self.settings.startup_delay, &cancel).await {
            tracing::info!("Poller cancelled before first cycle");
            return;
        }

        loop {
            tokio::select! {
                _ = self.poll_once() => {}
                _ = cancel.cancelled() => {
                    tracing::info!("Poller cancelled; abandoning in-flight cycle");
                    return;
                }
            }

            if !sleep_or_cancel(self.settings.interval, &cancel).await {
                tracing::info!("Poller stopped after {} cycles", self.cycles);
                return;
            }
        }
    }
}

/// Sleep for `dur`; `false` if cancelled first.
async fn sleep_or_cancel(dur: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = sleep(dur) => true,
        _ = cancel.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StoreError;
    use crate::persistence::{AddOutcome, JsonWatchlist, RemoveOutcome};
    use crate::services::provider::SimulatedProvider;
    use crate::state::course::Subscription;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;
    use tokio::time::Instant;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn key(crn: &str) -> SubscriptionKey {
        SubscriptionKey::parse(crn, "202610").unwrap()
    }

    /// Simulated provider that counts calls per key and can stall chosen keys.
    #[derive(Default)]
    struct Recording {
        inner: SimulatedProvider,
        calls: Mutex<HashMap<SubscriptionKey, usize>>,
        stalled: Mutex<Vec<SubscriptionKey>>,
    }

    impl Recording {
        fn calls(&self, key: &SubscriptionKey) -> usize {
            self.calls.lock().unwrap().get(key).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl AvailabilityProvider for Recording {
        async fn fetch(&self, key: &SubscriptionKey) -> Result<AvailabilityRecord, FetchError> {
            *self.calls.lock().unwrap().entry(key.clone()).or_default() += 1;
            let stalled = self.stalled.lock().unwrap().contains(key);
            if stalled {
                std::future::pending::<()>().await;
            }
            self.inner.fetch(key).await
        }
    }

    /// Provider that spends five seconds on every fetch and records when each began.
    struct Slow {
        base: Instant,
        starts: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl AvailabilityProvider for Slow {
        async fn fetch(&self, key: &SubscriptionKey) -> Result<AvailabilityRecord, FetchError> {
            self.starts.lock().unwrap().push(self.base.elapsed());
            sleep(Duration::from_secs(5)).await;
            SimulatedProvider::new().fetch(key).await
        }
    }

    /// Provider whose very first fetch panics.
    #[derive(Default)]
    struct PanicsOnce {
        inner: SimulatedProvider,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AvailabilityProvider for PanicsOnce {
        async fn fetch(&self, key: &SubscriptionKey) -> Result<AvailabilityRecord, FetchError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("seat page layout changed");
            }
            self.inner.fetch(key).await
        }
    }

    /// Store whose file is never readable.
    struct Broken;

    #[async_trait]
    impl SubscriptionStore for Broken {
        async fn list_all(&self) -> Result<Vec<Subscription>, StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk gone")))
        }
        async fn list_for(&self, _: &str) -> Result<Vec<SubscriptionKey>, StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk gone")))
        }
        async fn add(&self, _: &str, _: &SubscriptionKey) -> Result<AddOutcome, StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk gone")))
        }
        async fn remove(&self, _: &str, _: &SubscriptionKey) -> Result<RemoveOutcome, StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk gone")))
        }
    }

    fn settings() -> PollerSettings {
        PollerSettings {
            startup_delay: Duration::from_secs(2),
            interval: Duration::from_secs(60),
            fetch_timeout: TIMEOUT,
            max_concurrent_fetches: 4,
        }
    }

    /// In-memory watchlist with a fixed content.
    struct Fixed(Vec<Subscription>);

    #[async_trait]
    impl SubscriptionStore for Fixed {
        async fn list_all(&self) -> Result<Vec<Subscription>, StoreError> {
            Ok(self.0.clone())
        }
        async fn list_for(&self, id: &str) -> Result<Vec<SubscriptionKey>, StoreError> {
            Ok(self.0.iter().filter(|s| s.subscriber_id == id).map(|s| s.key.clone()).collect())
        }
        async fn add(&self, _: &str, _: &SubscriptionKey) -> Result<AddOutcome, StoreError> {
            unimplemented!("fixed watchlist")
        }
        async fn remove(&self, _: &str, _: &SubscriptionKey) -> Result<RemoveOutcome, StoreError> {
            unimplemented!("fixed watchlist")
        }
    }

    fn watchlist(entries: &[(&str, &str)]) -> Arc<Fixed> {
        Arc::new(Fixed(
            entries
                .iter()
                .map(|(subscriber, crn)| Subscription {
                    subscriber_id: subscriber.to_string(),
                    key: key(crn),
                })
                .collect(),
        ))
    }

    #[tokio::test]
    async fn first_cycle_only_records_baseline() {
        let store = watchlist(&[("1", "12384")]);
        let provider = Arc::new(Recording::default());
        let mut poller = Poller::new(store, provider, settings());

        let outcome = poller.poll_once().await.unwrap();
        assert!(outcome.events.is_empty());
        assert_eq!(poller.tracker().get(&key("12384")), Some("2"));
        assert_eq!(outcome.report.fetched, 1);
        assert_eq!(outcome.report.tracked_keys, 1);
    }

    #[tokio::test]
    async fn unchanged_value_emits_nothing() {
        let store = watchlist(&[("1", "12384")]);
        let provider = Arc::new(Recording::default());
        let mut poller = Poller::new(store, provider, settings());

        let outcomes = poller.run_cycles(3).await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.events.is_empty()));
    }

    #[tokio::test]
    async fn decrease_emits_exactly_one_event() {
        let store = watchlist(&[("1", "12384")]);
        let provider = Arc::new(Recording::default());
        let mut poller = Poller::new(store, provider.clone(), settings());

        poller.poll_once().await.unwrap();
        provider.inner.set_remaining(&key("12384"), "1");
        let outcome = poller.poll_once().await.unwrap();

        assert_eq!(outcome.events.len(), 1);
        let event = &outcome.events[0];
        assert_eq!(event.key, key("12384"));
        assert_eq!(event.previous.as_deref(), Some("2"));
        assert_eq!(event.current, "1");

        // Settles on the new value.
        let outcome = poller.poll_once().await.unwrap();
        assert!(outcome.events.is_empty());
    }

    #[tokio::test]
    async fn shared_key_is_fetched_once_per_cycle() {
        let store = watchlist(&[("1", "12384"), ("2", "12384")]);
        let provider = Arc::new(Recording::default());
        let mut poller = Poller::new(store, provider.clone(), settings());

        let outcome = poller.poll_once().await.unwrap();
        assert_eq!(provider.calls(&key("12384")), 1);
        assert_eq!(outcome.report.subscriptions, 2);
        assert_eq!(outcome.report.distinct_keys, 1);

        provider.inner.set_remaining(&key("12384"), "0");
        let outcome = poller.poll_once().await.unwrap();
        assert_eq!(provider.calls(&key("12384")), 2);
        assert_eq!(outcome.events.len(), 1);
    }

    #[tokio::test]
    async fn failed_fetch_leaves_tracker_and_other_keys_alone() {
        let store = watchlist(&[("1", "12384"), ("2", "12385")]);
        let provider = Arc::new(Recording::default());
        let mut poller = Poller::new(store, provider.clone(), settings());

        poller.poll_once().await.unwrap();

        provider.inner.set(key("12384"), Err(FetchError::Status(503)));
        provider.inner.set_remaining(&key("12385"), "3");
        let outcome = poller.poll_once().await.unwrap();

        assert_eq!(outcome.report.failed, 1);
        assert_eq!(outcome.report.fetched, 1);
        assert_eq!(poller.tracker().get(&key("12384")), Some("2"));
        assert_eq!(outcome.report.tracked_keys, 2);
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].key, key("12385"));
    }

    #[tokio::test]
    async fn unreadable_store_is_an_empty_cycle() {
        let provider = Arc::new(Recording::default());
        let mut poller = Poller::new(Arc::new(Broken), provider, settings());

        let outcome = poller.poll_once().await.unwrap();
        assert_eq!(outcome.report.distinct_keys, 0);
        assert!(outcome.report.store_error.is_some());
        assert!(poller.tracker().is_empty());
    }

    #[tokio::test]
    async fn corrupt_watchlist_file_is_an_empty_cycle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("watchlist.json");
        std::fs::write(&path, "{{{").unwrap();
        let store = Arc::new(JsonWatchlist::new(path));
        let mut poller = Poller::new(store, Arc::new(Recording::default()), settings());

        let outcome = poller.poll_once().await.unwrap();
        assert_eq!(outcome.report.subscriptions, 0);
        assert!(outcome.events.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_fetch_times_out_without_blocking_the_cycle() {
        let store = watchlist(&[("1", "12384"), ("1", "12385")]);
        let provider = Arc::new(Recording::default());
        provider.stalled.lock().unwrap().push(key("12384"));
        let mut poller = Poller::new(store, provider, settings());

        let outcome = poller.poll_once().await.unwrap();
        assert_eq!(outcome.report.failed, 1);
        assert_eq!(poller.tracker().get(&key("12384")), None);
        assert_eq!(poller.tracker().get(&key("12385")), Some("0"));
    }

    #[tokio::test]
    async fn status_reflects_latest_cycle() {
        let store = watchlist(&[("1", "12384")]);
        let mut poller = Poller::new(store, Arc::new(Recording::default()), settings());
        let status = poller.status();
        assert!(status.borrow().is_none());

        poller.run_cycles(2).await;
        assert_eq!(status.borrow().as_ref().map(|r| r.cycle), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_waits_polls_and_publishes_until_cancelled() {
        let store = watchlist(&[("1", "12384")]);
        let provider = Arc::new(Recording::default());
        let poller = Poller::new(store, provider.clone(), settings());
        let mut events = poller.subscribe();
        let status = poller.status();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poller.run(cancel.clone()));

        // Still inside the startup delay.
        sleep(Duration::from_secs(1)).await;
        assert_eq!(provider.calls(&key("12384")), 0);

        // First cycle at t=2s sets the baseline.
        sleep(Duration::from_secs(2)).await;
        assert_eq!(provider.calls(&key("12384")), 1);

        provider.inner.set_remaining(&key("12384"), "0");

        // Second cycle at t=62s sees the drop.
        sleep(Duration::from_secs(60)).await;
        assert_eq!(provider.calls(&key("12384")), 2);
        let event = events.recv().await.unwrap();
        assert_eq!(event.previous.as_deref(), Some("2"));
        assert_eq!(event.current, "0");
        assert_eq!(status.borrow().as_ref().map(|r| r.cycle), Some(2));

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(provider.calls(&key("12384")), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_startup_delay_runs_no_cycle() {
        let store = watchlist(&[("1", "12384")]);
        let provider = Arc::new(Recording::default());
        let poller = Poller::new(store, provider.clone(), settings());

        let cancel = CancellationToken::new();
        cancel.cancel();
        poller.run(cancel).await;

        assert_eq!(provider.calls(&key("12384")), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_counts_from_the_end_of_the_previous_cycle() {
        let store = watchlist(&[("1", "12384")]);
        let provider = Arc::new(Slow {
            base: Instant::now(),
            starts: Mutex::new(Vec::new()),
        });
        let poller = Poller::new(store, provider.clone(), settings());

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poller.run(cancel.clone()));

        sleep(Duration::from_secs(140)).await;
        cancel.cancel();
        handle.await.unwrap();

        // 2s startup delay, then 5s of fetching plus 60s of waiting per cycle.
        let starts: Vec<u64> = provider.starts.lock().unwrap().iter().map(|d| d.as_secs()).collect();
        assert_eq!(starts, vec![2, 67, 132]);
    }

    #[tokio::test]
    async fn panicking_cycle_yields_none_and_next_cycle_runs() {
        let store = watchlist(&[("1", "12384")]);
        let provider = Arc::new(PanicsOnce::default());
        let mut poller = Poller::new(store, provider.clone(), settings());
        let status = poller.status();

        assert!(poller.poll_once().await.is_none());
        assert!(status.borrow().is_none());
        assert_eq!(poller.tracker().get(&key("12384")), None);

        let outcome = poller.poll_once().await.unwrap();
        assert_eq!(outcome.report.cycle, 2);
        assert_eq!(outcome.report.fetched, 1);
        assert_eq!(poller.tracker().get(&key("12384")), Some("2"));
        assert_eq!(status.borrow().as_ref().map(|r| r.cycle), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_survives_a_panicking_cycle() {
        let store = watchlist(&[("1", "12384")]);
        let provider = Arc::new(PanicsOnce::default());
        let poller = Poller::new(store, provider.clone(), settings());
        let status = poller.status();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poller.run(cancel.clone()));

        // Cycles at t=2s (panics), 62s and 122s.
        sleep(Duration::from_secs(125)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(status.borrow().as_ref().map(|r| r.cycle), Some(3));
    }

    #[tokio::test]
    async fn end_to_end_subscribe_then_detect_drop() {
        use crate::services::watchlist_service;

        let dir = tempdir().unwrap();
        let store = Arc::new(JsonWatchlist::new(dir.path().join("watchlist.json")));
        let provider = Arc::new(SimulatedProvider::new());

        let (key, _) = watchlist_service::subscribe(
            store.as_ref(),
            provider.as_ref(),
            TIMEOUT,
            "1",
            "12384",
            "Fall 2025",
        )
        .await
        .unwrap();
        assert_eq!(key, SubscriptionKey::parse("12384", "202610").unwrap());

        let mut poller = Poller::new(store, provider.clone(), settings());
        let baseline = poller.poll_once().await.unwrap();
        assert!(baseline.events.is_empty());

        provider.set_remaining(&key, "0");
        let outcome = poller.poll_once().await.unwrap();
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].key, key);
        assert_eq!(outcome.events[0].previous.as_deref(), Some("2"));
        assert_eq!(outcome.events[0].current, "0");
    }
}
