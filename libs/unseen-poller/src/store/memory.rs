use dashmap::DashMap;
use tokio::sync::broadcast;

use super::{KeyValueStore, StorageEvent, WriterId, EVENT_CAPACITY};
use crate::error::StorageError;

/// In-process store. Share one behind an `Arc` between pollers to model
/// several tabs of the same browser profile.
pub struct MemoryStore {
    data: DashMap<String, String>,
    events: broadcast::Sender<StorageEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            data: DashMap::new(),
            events,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.data.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &str, writer: WriterId) -> Result<(), StorageError> {
        self.data.insert(key.to_string(), value.to_string());
        // No subscribers is fine.
        let _ = self.events.send(StorageEvent {
            key: key.to_string(),
            new_value: value.to_string(),
            writer,
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}
