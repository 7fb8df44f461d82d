//! Unseen-count polling for the inspection dashboard badge.
//!
//! A [`Poller`] periodically asks the backend how many occurrences are in
//! analysis, remembers the count the user last acknowledged, and publishes a
//! [`Snapshot`] whose `has_new` flag drives the badge.

pub mod backoff;
pub mod config;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod poller;
pub mod probe;
pub mod state;
pub mod store;

pub use config::PollerConfig;
pub use error::{FetchError, StorageError};
pub use fetch::{CountFetcher, HttpCountFetcher};
pub use poller::{Poller, PollerDeps};
pub use probe::{Connectivity, Switch, Visibility};
pub use state::Snapshot;
pub use store::{FileStore, KeyValueStore, MemoryStore, StorageEvent, WriterId};
