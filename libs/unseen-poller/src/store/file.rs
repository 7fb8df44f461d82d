use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::{KeyValueStore, StorageEvent, WriterId, EVENT_CAPACITY};
use crate::error::StorageError;

/// Acknowledgments kept as one JSON object on disk.
///
/// Writes go through a temp file and a rename. Another process writing the
/// same file is picked up by [`FileStore::reload`], which emits events with
/// [`WriterId::EXTERNAL`] for every key whose value changed.
pub struct FileStore {
    path: PathBuf,
    /// Last contents this handle read or wrote.
    known: Mutex<BTreeMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`. A missing or unreadable
    /// file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let known = read_map(&path).unwrap_or_else(|err| {
            tracing::warn!(path = %path.display(), %err, "ignoring unreadable acknowledgment file");
            BTreeMap::new()
        });
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            path,
            known: Mutex::new(known),
            events,
        }
    }

    /// `<data dir>/unseen-watch/acknowledgments.json`, if the platform has a
    /// data directory.
    pub fn default_location() -> Option<PathBuf> {
        dirs::data_local_dir().map(|p| p.join("unseen-watch").join("acknowledgments.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file and announce values changed by other processes.
    ///
    /// Returns how many keys changed.
    pub fn reload(&self) -> Result<usize, StorageError> {
        let on_disk = read_map(&self.path)?;
        let mut known = self.known.lock();

        let changed: Vec<(String, String)> = on_disk
            .iter()
            .filter(|(k, v)| known.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        *known = on_disk;
        drop(known);

        for (key, new_value) in &changed {
            tracing::debug!(%key, %new_value, "acknowledgment changed on disk");
            let _ = self.events.send(StorageEvent {
                key: key.clone(),
                new_value: new_value.clone(),
                writer: WriterId::EXTERNAL,
            });
        }
        Ok(changed.len())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let on_disk = read_map(&self.path)?;
        let value = on_disk.get(key).cloned();
        *self.known.lock() = on_disk;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str, writer: WriterId) -> Result<(), StorageError> {
        let mut known = self.known.lock();
        // Start from disk so keys written by other processes survive.
        let mut map = match read_map(&self.path) {
            Ok(map) => map,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), %err, "overwriting unreadable acknowledgment file");
                BTreeMap::new()
            }
        };
        map.insert(key.to_string(), value.to_string());
        write_map(&self.path, &map)?;
        *known = map;
        drop(known);

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

fn read_map(path: &Path) -> Result<BTreeMap<String, String>, StorageError> {
    match fs::read_to_string(path) {
        Ok(text) if text.trim().is_empty() => Ok(BTreeMap::new()),
        Ok(text) => Ok(serde_json::from_str(&text)?),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(err) => Err(err.into()),
    }
}

fn write_map(path: &Path, map: &BTreeMap<String, String>) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(map)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
