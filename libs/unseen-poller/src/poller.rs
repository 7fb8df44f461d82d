//! The unseen-count poller.
//!
//! One loop task polls the count and reschedules itself; one listener task
//! follows acknowledgments written by other pollers sharing the store. Both
//! stop when the [`Poller`] is stopped or dropped.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::backoff::failure_delay;
use crate::config::{storage_key, PollerConfig};
use crate::error::FetchError;
use crate::fetch::CountFetcher;
use crate::probe::{Connectivity, Visibility};
use crate::state::{parse_count, PollState, Snapshot};
use crate::store::{KeyValueStore, StorageEvent, WriterId};

/// Capabilities the poller runs against.
#[derive(Clone)]
pub struct PollerDeps {
    pub fetcher: Arc<dyn CountFetcher>,
    pub store: Arc<dyn KeyValueStore>,
    pub visibility: Arc<dyn Visibility>,
    pub connectivity: Arc<dyn Connectivity>,
}

struct Inner {
    user_id: Option<String>,
    key: String,
    state: PollState,
    paused: bool,
    /// Token of the running loop, if any.
    loop_cancel: Option<CancellationToken>,
    /// The one outstanding count request, tagged with its sequence number.
    in_flight: Option<(u64, CancellationToken)>,
    next_request: u64,
}

struct Shared {
    config: PollerConfig,
    deps: PollerDeps,
    writer: WriterId,
    inner: Mutex<Inner>,
    snapshot: watch::Sender<Snapshot>,
    /// Cancelled on stop/drop; every task and request token descends from it.
    root: CancellationToken,
}

/// Handle to a running poller. Dropping it deactivates the poller.
pub struct Poller {
    shared: Arc<Shared>,
}

impl Poller {
    /// Activate a poller: load the acknowledged count for the configured
    /// identity, follow storage changes, and start polling unless
    /// `config.paused` is set.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: PollerConfig, deps: PollerDeps) -> Self {
        let key = storage_key(&config.namespace, config.user_id.as_deref());
        // Subscribe before loading so no write slips between the two.
        let events = deps.store.subscribe();
        let state = PollState {
            last_seen_count: load_seen(deps.store.as_ref(), &key),
            ..PollState::default()
        };
        let initial = state.snapshot(config.user_id.as_deref());
        let (snapshot, _) = watch::channel(initial);

        let shared = Arc::new(Shared {
            writer: WriterId::next(),
            inner: Mutex::new(Inner {
                user_id: config.user_id.clone(),
                key,
                state,
                paused: config.paused,
                loop_cancel: None,
                in_flight: None,
                next_request: 0,
            }),
            snapshot,
            root: CancellationToken::new(),
            config,
            deps,
        });

        tokio::spawn(listen_storage(
            Arc::clone(&shared),
            events,
            shared.root.child_token(),
        ));

        if shared.config.paused {
            tracing::info!(key = %shared.key(), "poller started paused");
        } else {
            shared.spawn_loop();
        }

        Poller { shared }
    }

    /// Record the current count as acknowledged and persist it.
    ///
    /// Persistence is best-effort: a failing store is logged and the
    /// in-memory value still changes. Returns the acknowledged count.
    pub fn mark_as_seen(&self) -> u64 {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        let current = inner.state.current_count;
        let seen = inner.state.acknowledge(current, shared.config.monotonic_seen);

        if let Err(err) = shared
            .deps
            .store
            .set(&inner.key, &seen.to_string(), shared.writer)
        {
            tracing::warn!(key = %inner.key, %err, "failed to persist acknowledgment");
        }
        tracing::debug!(key = %inner.key, seen, "marked as seen");
        shared.publish(&inner);
        seen
    }

    /// Suspend (`true`) or resume (`false`) polling. Pausing cancels any
    /// request in flight; resuming polls immediately.
    pub fn set_paused(&self, paused: bool) {
        let mut inner = self.shared.inner.lock();
        if inner.paused == paused {
            return;
        }
        inner.paused = paused;

        if paused {
            if let Some(token) = inner.loop_cancel.take() {
                token.cancel();
            }
            if let Some((_, token)) = inner.in_flight.take() {
                token.cancel();
            }
            tracing::info!(key = %inner.key, "polling paused");
        } else {
            tracing::info!(key = %inner.key, "polling resumed");
            drop(inner);
            self.shared.spawn_loop();
        }
    }

    /// Switch identity. Re-scopes the persisted key and reloads the
    /// acknowledged count from it; the current count is kept until the next
    /// poll refreshes it.
    pub fn set_user_id(&self, user_id: Option<String>) {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        let key = storage_key(&shared.config.namespace, user_id.as_deref());
        if key == inner.key && inner.user_id == user_id {
            return;
        }

        inner.state.last_seen_count = load_seen(shared.deps.store.as_ref(), &key);
        tracing::info!(from = %inner.key, to = %key, last_seen = ?inner.state.last_seen_count, "identity changed");
        inner.user_id = user_id;
        inner.key = key;
        shared.publish(&inner);
    }

    /// Deactivate: cancel the loop, the listener and any request in flight.
    pub fn stop(&self) {
        if !self.shared.root.is_cancelled() {
            tracing::debug!(key = %self.shared.key(), "poller stopped");
        }
        self.shared.root.cancel();
    }

    pub fn snapshot(&self) -> Snapshot {
        self.shared.snapshot.borrow().clone()
    }

    /// Receiver that wakes whenever the snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.shared.snapshot.subscribe()
    }

    pub fn has_new(&self) -> bool {
        self.shared.inner.lock().state.has_new()
    }

    pub fn current_count(&self) -> u64 {
        self.shared.inner.lock().state.current_count
    }

    pub fn last_seen_count(&self) -> Option<u64> {
        self.shared.inner.lock().state.last_seen_count
    }

    pub fn user_id(&self) -> Option<String> {
        self.shared.inner.lock().user_id.clone()
    }

    /// The key acknowledgments are persisted under.
    pub fn storage_key(&self) -> String {
        self.shared.key()
    }

    pub fn is_paused(&self) -> bool {
        self.shared.inner.lock().paused
    }

    /// Whether the polling loop is active (started, not paused, not stopped).
    pub fn is_polling(&self) -> bool {
        let inner = self.shared.inner.lock();
        inner
            .loop_cancel
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.shared.root.cancel();
    }
}

impl Shared {
    fn key(&self) -> String {
        self.inner.lock().key.clone()
    }

    fn publish(&self, inner: &Inner) {
        let next = inner.state.snapshot(inner.user_id.as_deref());
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn spawn_loop(self: &Arc<Self>) {
        if self.root.is_cancelled() {
            return;
        }
        let token = self.root.child_token();
        if let Some(previous) = self.inner.lock().loop_cancel.replace(token.clone()) {
            previous.cancel();
        }
        tokio::spawn(run_loop(Arc::clone(self), token));
    }

    /// One poll cycle. Returns the delay before the next one, or `None` when
    /// the loop has been cancelled.
    async fn poll_once(&self, loop_cancel: &CancellationToken) -> Option<Duration> {
        if loop_cancel.is_cancelled() {
            return None;
        }

        let interval = self.config.interval(self.deps.visibility.is_visible());
        if !self.deps.connectivity.is_online() {
            tracing::debug!(?interval, "offline, skipping count request");
            return Some(interval);
        }

        let request = loop_cancel.child_token();
        let request_id = {
            let mut inner = self.inner.lock();
            // Paused or superseded since the check above; a newer loop may
            // already own `in_flight`.
            if request.is_cancelled() {
                return None;
            }
            let id = inner.next_request;
            inner.next_request += 1;
            if let Some((_, previous)) = inner.in_flight.replace((id, request.clone())) {
                previous.cancel();
            }
            id
        };

        let timeout = self.config.timeout_for(interval);
        let result =
            match tokio::time::timeout(timeout, self.deps.fetcher.fetch_count(&request)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout),
            };

        let mut inner = self.inner.lock();
        if inner
            .in_flight
            .as_ref()
            .is_some_and(|(id, _)| *id == request_id)
        {
            inner.in_flight = None;
        }

        // Aborted requests leave no trace.
        if request.is_cancelled() || matches!(result, Err(FetchError::Cancelled)) {
            return None;
        }

        match result {
            Ok(count) => {
                inner.state.current_count = count;
                inner.state.failure_streak = 0;
                inner.state.last_success_at = Some(Utc::now());
                tracing::debug!(count, has_new = inner.state.has_new(), "count refreshed");
                self.publish(&inner);
                Some(interval)
            }
            Err(err) => {
                inner.state.failure_streak = inner.state.failure_streak.saturating_add(1);
                let streak = inner.state.failure_streak;
                let delay = failure_delay(interval, streak);
                tracing::warn!(%err, streak, retry_in = ?delay, "count request failed");
                self.publish(&inner);
                Some(delay)
            }
        }
    }

    /// Apply a write made by another poller sharing the store.
    fn apply_external(&self, event: &StorageEvent) {
        let mut inner = self.inner.lock();
        if event.key != inner.key || event.writer == self.writer {
            return;
        }
        let value = parse_count(&event.new_value);
        let seen = inner.state.acknowledge(value, self.config.monotonic_seen);
        tracing::debug!(key = %inner.key, seen, "acknowledgment synced from another writer");
        self.publish(&inner);
    }

    fn reload_seen(&self) {
        let mut inner = self.inner.lock();
        inner.state.last_seen_count = load_seen(self.deps.store.as_ref(), &inner.key);
        self.publish(&inner);
    }
}

async fn run_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    tracing::debug!("poll loop started");
    while let Some(delay) = shared.poll_once(&cancel).await {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    tracing::debug!("poll loop finished");
}

async fn listen_storage(
    shared: Arc<Shared>,
    mut events: broadcast::Receiver<StorageEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(event) => shared.apply_external(&event),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "storage events lagged, reloading acknowledgment");
                shared.reload_seen();
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Read the acknowledged count. Unreadable storage counts as 0; a missing
/// key means nothing was ever acknowledged.
fn load_seen(store: &dyn KeyValueStore, key: &str) -> Option<u64> {
    match store.get(key) {
        Ok(Some(raw)) => Some(parse_count(&raw)),
        Ok(None) => None,
        Err(err) => {
            tracing::warn!(%key, %err, "failed to read acknowledgment, assuming 0");
            Some(0)
        }
    }
}
