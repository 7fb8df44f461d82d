//! Persistence for acknowledged counts.
//!
//! Stores broadcast every write so that other pollers sharing the store
//! (other tabs, other windows) can follow acknowledgments without a network
//! round trip.

mod file;
mod memory;

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;

use crate::error::StorageError;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Capacity of a store's change channel. Listeners that fall behind reload
/// the key instead of replaying missed events.
pub(crate) const EVENT_CAPACITY: usize = 256;

/// Identifies who wrote a value, so a poller can ignore its own writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WriterId(u64);

impl WriterId {
    /// Writes that came from outside this process (picked up from disk).
    pub const EXTERNAL: WriterId = WriterId(0);

    /// A fresh id, unique within the process.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        WriterId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A value changed under `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub new_value: String,
    pub writer: WriterId,
}

/// String key-value persistence with change notification.
///
/// Calls are synchronous: an acknowledgment is persisted before
/// `mark_as_seen` returns.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str, writer: WriterId) -> Result<(), StorageError>;
    /// Receive every subsequent write, from any writer.
    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;
}
