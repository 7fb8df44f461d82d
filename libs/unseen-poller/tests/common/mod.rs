#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use unseen_poller::{
    CountFetcher, FetchError, KeyValueStore, MemoryStore, PollerDeps, Snapshot, StorageError,
    StorageEvent, Switch, WriterId,
};

/// Replays scripted responses; the last one repeats forever. Records the
/// (virtual) instant of every call.
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<Result<u64, FetchError>>>,
    last: Mutex<Result<u64, FetchError>>,
    calls: Mutex<Vec<Instant>>,
}

impl ScriptedFetcher {
    pub fn new(script: Vec<Result<u64, FetchError>>) -> Arc<Self> {
        let last = script.last().cloned().unwrap_or(Ok(0));
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(last),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn always(response: Result<u64, FetchError>) -> Arc<Self> {
        Self::new(vec![response])
    }

    pub fn calls(&self) -> Vec<Instant> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Gaps between consecutive calls.
    pub fn gaps(&self) -> Vec<Duration> {
        self.calls().windows(2).map(|w| w[1] - w[0]).collect()
    }
}

#[async_trait]
impl CountFetcher for ScriptedFetcher {
    async fn fetch_count(&self, _cancel: &CancellationToken) -> Result<u64, FetchError> {
        self.calls.lock().push(Instant::now());
        let next = self.script.lock().pop_front();
        match next {
            Some(response) => {
                *self.last.lock() = response.clone();
                response
            }
            None => self.last.lock().clone(),
        }
    }
}

/// Never answers; only returns once cancelled.
#[derive(Default)]
pub struct HangingFetcher {
    pub started: AtomicUsize,
    pub cancelled: AtomicUsize,
    calls: Mutex<Vec<Instant>>,
}

impl HangingFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Instant> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CountFetcher for HangingFetcher {
    async fn fetch_count(&self, cancel: &CancellationToken) -> Result<u64, FetchError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().push(Instant::now());
        cancel.cancelled().await;
        self.cancelled.fetch_add(1, Ordering::SeqCst);
        Err(FetchError::Cancelled)
    }
}

/// A store whose every operation fails, like storage disabled in a private
/// window.
pub struct BrokenStore {
    events: broadcast::Sender<StorageEvent>,
}

impl BrokenStore {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(8);
        Arc::new(Self { events })
    }
}

impl KeyValueStore for BrokenStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Io(std::io::Error::other("storage disabled")))
    }

    fn set(&self, _key: &str, _value: &str, _writer: WriterId) -> Result<(), StorageError> {
        Err(StorageError::Io(std::io::Error::other("quota exceeded")))
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}

/// Probes and store handed to the poller, with handles kept for the test.
pub struct Harness {
    pub store: Arc<dyn KeyValueStore>,
    pub visible: Switch,
    pub online: Switch,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    pub fn with_store(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            visible: Switch::on(),
            online: Switch::on(),
        }
    }

    pub fn deps(&self, fetcher: Arc<dyn CountFetcher>) -> PollerDeps {
        PollerDeps {
            fetcher,
            store: Arc::clone(&self.store),
            visibility: Arc::new(self.visible.clone()),
            connectivity: Arc::new(self.online.clone()),
        }
    }
}

/// Wait (real or virtual time) until the snapshot satisfies `pred`.
pub async fn wait_for(
    rx: &mut watch::Receiver<Snapshot>,
    pred: impl Fn(&Snapshot) -> bool,
) -> Snapshot {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| pred(s)))
        .await
        .expect("timed out waiting for snapshot")
        .expect("poller dropped")
        .clone()
}

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Assert call gaps match `expected`, allowing a millisecond of timer
/// rounding.
pub fn assert_gaps(actual: &[Duration], expected: &[Duration]) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "gap count differs: {actual:?} vs {expected:?}"
    );
    for (a, e) in actual.iter().zip(expected) {
        let diff = if a > e { *a - *e } else { *e - *a };
        assert!(diff <= ms(1), "gap {a:?} differs from {e:?} (all: {actual:?})");
    }
}
