//! Fetching the number of occurrences in analysis.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::state::count_at;

/// Default JSON field carrying the total.
pub const DEFAULT_COUNT_FIELD: &str = "totalCount";

/// One request for the current count.
///
/// Implementations must return [`FetchError::Cancelled`] (and nothing else)
/// once `cancel` fires, and should stop any work in flight.
#[async_trait]
pub trait CountFetcher: Send + Sync {
    async fn fetch_count(&self, cancel: &CancellationToken) -> Result<u64, FetchError>;
}

/// Reads the count from a JSON endpoint, e.g.
/// `GET /api/occurrences/count?status=in_analysis` → `{"totalCount": 5}`.
#[derive(Clone)]
pub struct HttpCountFetcher {
    url: String,
    field: String,
    bearer_token: Option<String>,
    http: reqwest::Client,
}

impl HttpCountFetcher {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            field: DEFAULT_COUNT_FIELD.to_string(),
            bearer_token: None,
            http: reqwest::Client::new(),
        }
    }

    /// Field holding the count; dots descend into nested objects
    /// (`meta.total`).
    pub fn with_field(mut self, field: &str) -> Self {
        self.field = field.to_string();
        self
    }

    pub fn with_bearer_token(mut self, token: &str) -> Self {
        self.bearer_token = Some(token.to_string());
        self
    }

    /// Reuse an existing client (connection pool, proxy settings).
    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn request(&self) -> Result<u64, FetchError> {
        let mut req = self.http.get(&self.url).header(ACCEPT, "application/json");
        if let Some(token) = &self.bearer_token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;
        Ok(count_at(&body, &self.field))
    }
}

#[async_trait]
impl CountFetcher for HttpCountFetcher {
    async fn fetch_count(&self, cancel: &CancellationToken) -> Result<u64, FetchError> {
        // Dropping the request future aborts the connection.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            res = self.request() => res,
        }
    }
}
