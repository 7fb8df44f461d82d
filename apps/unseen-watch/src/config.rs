use std::path::PathBuf;
use std::time::Duration;

use unseen_poller::config::{
    DEFAULT_INTERVAL_BACKGROUND, DEFAULT_INTERVAL_FOREGROUND, DEFAULT_NAMESPACE,
};
use unseen_poller::fetch::DEFAULT_COUNT_FIELD;
use unseen_poller::PollerConfig;

/// Watcher configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Endpoint returning the in-analysis total (e.g.
    /// `https://api.example.org/occurrences/count?status=in_analysis`).
    pub count_url: String,
    /// JSON field (dotted path) holding the total.
    pub count_field: String,
    /// Bearer token sent with every request.
    pub api_token: Option<String>,
    /// Identity the acknowledgment is scoped to.
    pub user_id: Option<String>,
    pub interval_foreground: Duration,
    pub interval_background: Duration,
    pub request_timeout: Option<Duration>,
    pub namespace: String,
    /// Acknowledgment file. Defaults to the platform data directory.
    pub store_path: Option<PathBuf>,
    /// How often to pick up acknowledgments written by other watchers.
    pub store_reload: Duration,
    pub monotonic_seen: bool,
    /// Base URL of the notification feed; the feed commands are disabled
    /// without it.
    pub notifications_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            count_url: required_var("COUNT_URL"),
            count_field: optional_var("COUNT_FIELD")
                .unwrap_or_else(|| DEFAULT_COUNT_FIELD.to_string()),
            api_token: optional_var("API_TOKEN"),
            user_id: optional_var("USER_ID"),
            interval_foreground: millis_var("POLL_FOREGROUND_MS")
                .unwrap_or(DEFAULT_INTERVAL_FOREGROUND),
            interval_background: millis_var("POLL_BACKGROUND_MS")
                .unwrap_or(DEFAULT_INTERVAL_BACKGROUND),
            request_timeout: millis_var("REQUEST_TIMEOUT_MS"),
            namespace: optional_var("KEY_NAMESPACE")
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            store_path: optional_var("STORE_PATH").map(PathBuf::from),
            store_reload: millis_var("STORE_RELOAD_MS").unwrap_or(Duration::from_secs(2)),
            monotonic_seen: optional_var("MONOTONIC_SEEN")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
            notifications_url: optional_var("NOTIFICATIONS_URL"),
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            user_id: self.user_id.clone(),
            interval_foreground: self.interval_foreground,
            interval_background: self.interval_background,
            paused: false,
            namespace: self.namespace.clone(),
            request_timeout: self.request_timeout,
            monotonic_seen: self.monotonic_seen,
        }
    }
}

fn required_var(name: &str) -> String {
    optional_var(name).unwrap_or_else(|| panic!("{name} env var is required"))
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn millis_var(name: &str) -> Option<Duration> {
    let raw = optional_var(name)?;
    match parse_millis(&raw) {
        Some(d) => Some(d),
        None => {
            tracing::warn!(%name, value = %raw, "ignoring invalid duration");
            None
        }
    }
}

/// Positive whole milliseconds.
fn parse_millis(raw: &str) -> Option<Duration> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
