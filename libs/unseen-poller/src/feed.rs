//! Paginated notification feed with optimistic read-state updates.
//!
//! The badge tells the user *that* something is new; the feed lists it.
//! Marking an item read flips it locally first and rolls back if the backend
//! refuses.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

pub const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    pub items: Vec<Notification>,
    #[serde(default)]
    pub total_count: u64,
}

/// Remote side of the feed. Pages are 1-based.
#[async_trait]
pub trait FeedBackend: Send + Sync {
    async fn list(&self, page: u32, page_size: u32) -> Result<FeedPage, FetchError>;
    async fn mark_read(&self, id: &str) -> Result<(), FetchError>;
    async fn mark_all_read(&self) -> Result<(), FetchError>;
}

#[derive(Default)]
struct FeedState {
    items: Vec<Notification>,
    total_count: u64,
    /// Last page loaded; 0 before the first load.
    page: u32,
    exhausted: bool,
}

pub struct NotificationFeed<B> {
    backend: B,
    page_size: u32,
    state: Mutex<FeedState>,
}

impl<B: FeedBackend> NotificationFeed<B> {
    pub fn new(backend: B) -> Self {
        Self::with_page_size(backend, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(backend: B, page_size: u32) -> Self {
        Self {
            backend,
            page_size: page_size.max(1),
            state: Mutex::new(FeedState::default()),
        }
    }

    /// Reload the first page, replacing whatever was listed.
    pub async fn refresh(&self) -> Result<(), FetchError> {
        let page = self.backend.list(1, self.page_size).await?;
        let mut state = self.state.lock();
        state.exhausted = self.is_last(&page, page.items.len());
        state.total_count = page.total_count;
        state.items = page.items;
        state.page = 1;
        Ok(())
    }

    /// Append the next page. Items already listed are skipped, which happens
    /// when new notifications shift the pages between requests. Returns how
    /// many items were added.
    pub async fn load_more(&self) -> Result<usize, FetchError> {
        let next = {
            let state = self.state.lock();
            if state.exhausted {
                return Ok(0);
            }
            state.page + 1
        };

        let page = self.backend.list(next, self.page_size).await?;
        let mut state = self.state.lock();
        let known: HashSet<String> = state.items.iter().map(|n| n.id.clone()).collect();
        let fresh: Vec<Notification> = page
            .items
            .iter()
            .filter(|n| !known.contains(&n.id))
            .cloned()
            .collect();
        let added = fresh.len();

        state.items.extend(fresh);
        state.total_count = page.total_count;
        state.page = next;
        state.exhausted = self.is_last(&page, state.items.len());
        Ok(added)
    }

    /// A short or empty page ends the feed. `totalCount` only counts when the
    /// server reports one; 0 next to a non-empty page means it left it out.
    fn is_last(&self, page: &FeedPage, listed: usize) -> bool {
        if page.items.len() < self.page_size as usize {
            return true;
        }
        page.total_count > 0 && listed as u64 >= page.total_count
    }

    /// Mark one item read. Unknown or already-read ids only hit the backend.
    pub async fn mark_read(&self, id: &str) -> Result<(), FetchError> {
        let flipped = {
            let mut state = self.state.lock();
            match state.items.iter_mut().find(|n| n.id == id) {
                Some(item) if !item.read => {
                    item.read = true;
                    true
                }
                _ => false,
            }
        };

        if let Err(err) = self.backend.mark_read(id).await {
            if flipped {
                self.set_read(|n| n.id == id, false);
            }
            tracing::warn!(%id, %err, "mark read failed, rolled back");
            return Err(err);
        }
        Ok(())
    }

    /// Mark everything read, restoring the previously unread items on error.
    pub async fn mark_all_read(&self) -> Result<(), FetchError> {
        let flipped: HashSet<String> = {
            let mut state = self.state.lock();
            state
                .items
                .iter_mut()
                .filter(|n| !n.read)
                .map(|n| {
                    n.read = true;
                    n.id.clone()
                })
                .collect()
        };

        if let Err(err) = self.backend.mark_all_read().await {
            self.set_read(|n| flipped.contains(&n.id), false);
            tracing::warn!(restored = flipped.len(), %err, "mark all read failed, rolled back");
            return Err(err);
        }
        Ok(())
    }

    pub fn items(&self) -> Vec<Notification> {
        self.state.lock().items.clone()
    }

    pub fn unread_count(&self) -> usize {
        self.state.lock().items.iter().filter(|n| !n.read).count()
    }

    pub fn total_count(&self) -> u64 {
        self.state.lock().total_count
    }

    pub fn has_more(&self) -> bool {
        !self.state.lock().exhausted
    }

    fn set_read(&self, pred: impl Fn(&Notification) -> bool, read: bool) {
        let mut state = self.state.lock();
        for item in state.items.iter_mut().filter(|n| pred(n)) {
            item.read = read;
        }
    }
}

/// Feed endpoints under a base URL:
/// `GET /notifications?page=&pageSize=`, `PATCH /notifications/{id}/read`,
/// `PATCH /notifications/read-all`.
#[derive(Clone)]
pub struct HttpFeedBackend {
    base_url: String,
    bearer_token: Option<String>,
    http: reqwest::Client,
}

impl HttpFeedBackend {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_bearer_token(mut self, token: &str) -> Self {
        self.bearer_token = Some(token.to_string());
        self
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn patch(&self, path: &str) -> Result<(), FetchError> {
        let url = format!("{}{path}", self.base_url);
        let resp = self.authorize(self.http.patch(&url)).send().await?;
        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl FeedBackend for HttpFeedBackend {
    async fn list(&self, page: u32, page_size: u32) -> Result<FeedPage, FetchError> {
        let url = format!("{}/notifications", self.base_url);
        let resp = self
            .authorize(self.http.get(&url))
            .query(&[("page", page), ("pageSize", page_size)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status().as_u16()));
        }
        resp.json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }

    async fn mark_read(&self, id: &str) -> Result<(), FetchError> {
        self.patch(&format!("/notifications/{id}/read")).await
    }

    async fn mark_all_read(&self) -> Result<(), FetchError> {
        self.patch("/notifications/read-all").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn note(id: &str, read: bool) -> Notification {
        Notification {
            id: id.to_string(),
            title: format!("Occurrence {id}"),
            body: None,
            created_at: Utc::now(),
            read,
        }
    }

    /// Serves `all` in pages; write calls fail while `fail_writes` is set.
    struct FakeBackend {
        all: Vec<Notification>,
        fail_writes: AtomicBool,
    }

    impl FakeBackend {
        fn new(all: Vec<Notification>) -> Self {
            Self {
                all,
                fail_writes: AtomicBool::new(false),
            }
        }

        fn write_result(&self) -> Result<(), FetchError> {
            if self.fail_writes.load(Ordering::Relaxed) {
                Err(FetchError::Status(503))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl FeedBackend for FakeBackend {
        async fn list(&self, page: u32, page_size: u32) -> Result<FeedPage, FetchError> {
            let start = ((page - 1) * page_size) as usize;
            let items = self
                .all
                .iter()
                .skip(start)
                .take(page_size as usize)
                .cloned()
                .collect();
            Ok(FeedPage {
                items,
                total_count: self.all.len() as u64,
            })
        }

        async fn mark_read(&self, _id: &str) -> Result<(), FetchError> {
            self.write_result()
        }

        async fn mark_all_read(&self) -> Result<(), FetchError> {
            self.write_result()
        }
    }

    fn five_unread() -> Vec<Notification> {
        (1..=5).map(|i| note(&i.to_string(), false)).collect()
    }

    #[tokio::test]
    async fn pages_until_exhausted() {
        let feed = NotificationFeed::with_page_size(FakeBackend::new(five_unread()), 2);
        feed.refresh().await.unwrap();
        assert_eq!(feed.items().len(), 2);
        assert!(feed.has_more());

        assert_eq!(feed.load_more().await.unwrap(), 2);
        assert_eq!(feed.load_more().await.unwrap(), 1);
        assert!(!feed.has_more());
        assert_eq!(feed.load_more().await.unwrap(), 0);

        let ids: Vec<_> = feed.items().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);
        assert_eq!(feed.total_count(), 5);
    }

    /// Pages through `all` without reporting a total.
    struct UncountedBackend(FakeBackend);

    #[async_trait]
    impl FeedBackend for UncountedBackend {
        async fn list(&self, page: u32, page_size: u32) -> Result<FeedPage, FetchError> {
            let mut listed = self.0.list(page, page_size).await?;
            listed.total_count = 0;
            Ok(listed)
        }

        async fn mark_read(&self, id: &str) -> Result<(), FetchError> {
            self.0.mark_read(id).await
        }

        async fn mark_all_read(&self) -> Result<(), FetchError> {
            self.0.mark_all_read().await
        }
    }

    #[tokio::test]
    async fn pages_without_total_count_until_short_page() {
        let backend = UncountedBackend(FakeBackend::new(five_unread()));
        let feed = NotificationFeed::with_page_size(backend, 2);
        feed.refresh().await.unwrap();
        assert!(feed.has_more());

        assert_eq!(feed.load_more().await.unwrap(), 2);
        assert!(feed.has_more());
        assert_eq!(feed.load_more().await.unwrap(), 1);
        assert!(!feed.has_more());
        assert_eq!(feed.items().len(), 5);
    }

    #[tokio::test]
    async fn exact_multiple_without_total_ends_on_empty_page() {
        let backend = UncountedBackend(FakeBackend::new(five_unread()[..4].to_vec()));
        let feed = NotificationFeed::with_page_size(backend, 2);
        feed.refresh().await.unwrap();

        assert_eq!(feed.load_more().await.unwrap(), 2);
        assert!(feed.has_more());
        assert_eq!(feed.load_more().await.unwrap(), 0);
        assert!(!feed.has_more());
    }

    #[tokio::test]
    async fn empty_feed_has_nothing_more() {
        let feed = NotificationFeed::new(FakeBackend::new(Vec::new()));
        feed.refresh().await.unwrap();
        assert!(!feed.has_more());
        assert_eq!(feed.total_count(), 0);
    }

    #[tokio::test]
    async fn refresh_replaces_list() {
        let feed = NotificationFeed::with_page_size(FakeBackend::new(five_unread()), 2);
        feed.refresh().await.unwrap();
        feed.load_more().await.unwrap();
        feed.refresh().await.unwrap();
        assert_eq!(feed.items().len(), 2);
    }

    #[tokio::test]
    async fn mark_read_is_optimistic() {
        let feed = NotificationFeed::new(FakeBackend::new(five_unread()));
        feed.refresh().await.unwrap();
        assert_eq!(feed.unread_count(), 5);

        feed.mark_read("3").await.unwrap();
        assert_eq!(feed.unread_count(), 4);
        assert!(feed.items().iter().any(|n| n.id == "3" && n.read));
    }

    #[tokio::test]
    async fn mark_read_rolls_back_on_failure() {
        let backend = FakeBackend::new(five_unread());
        backend.fail_writes.store(true, Ordering::Relaxed);
        let feed = NotificationFeed::new(backend);
        feed.refresh().await.unwrap();

        let err = feed.mark_read("2").await.unwrap_err();
        assert_eq!(err, FetchError::Status(503));
        assert_eq!(feed.unread_count(), 5);
    }

    #[tokio::test]
    async fn failed_mark_read_keeps_items_that_were_already_read() {
        let mut all = five_unread();
        all[0].read = true;
        let backend = FakeBackend::new(all);
        backend.fail_writes.store(true, Ordering::Relaxed);
        let feed = NotificationFeed::new(backend);
        feed.refresh().await.unwrap();

        assert!(feed.mark_read("1").await.is_err());
        assert!(feed.items()[0].read);
    }

    #[tokio::test]
    async fn mark_all_read_rolls_back_only_flipped_items() {
        let mut all = five_unread();
        all[4].read = true;
        let backend = FakeBackend::new(all);
        backend.fail_writes.store(true, Ordering::Relaxed);
        let feed = NotificationFeed::new(backend);
        feed.refresh().await.unwrap();

        assert!(feed.mark_all_read().await.is_err());
        assert_eq!(feed.unread_count(), 4);
        assert!(feed.items()[4].read);
    }

    #[tokio::test]
    async fn mark_all_read_succeeds() {
        let feed = NotificationFeed::new(FakeBackend::new(five_unread()));
        feed.refresh().await.unwrap();
        feed.mark_all_read().await.unwrap();
        assert_eq!(feed.unread_count(), 0);
    }

    #[test]
    fn page_parses_camel_case() {
        let json = r#"{
            "items": [{"id": "n1", "title": "Pothole reported", "createdAt": "2026-03-01T10:00:00Z"}],
            "totalCount": 12
        }"#;
        let page: FeedPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.total_count, 12);
        assert_eq!(page.items[0].id, "n1");
        assert!(!page.items[0].read);
        assert!(page.items[0].body.is_none());
    }
}
