use std::time::Duration;

/// Default polling period while the page is visible.
pub const DEFAULT_INTERVAL_FOREGROUND: Duration = Duration::from_secs(45);
/// Default polling period while the page is hidden.
pub const DEFAULT_INTERVAL_BACKGROUND: Duration = Duration::from_secs(120);
/// Default key prefix for persisted acknowledgments.
pub const DEFAULT_NAMESPACE: &str = "unseen-count";
/// Scope used when no user identity is known.
pub const ANONYMOUS_SCOPE: &str = "anon";

/// Poller options.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Scopes the persisted acknowledgment. `None` uses [`ANONYMOUS_SCOPE`].
    pub user_id: Option<String>,
    /// Polling period while the page is visible.
    pub interval_foreground: Duration,
    /// Polling period while the page is hidden.
    pub interval_background: Duration,
    /// Start without polling until [`crate::Poller::set_paused`] clears it.
    pub paused: bool,
    /// Prefix of the persisted key (`<namespace>:<user>`).
    pub namespace: String,
    /// Upper bound for a single count request. `None` bounds it by the
    /// applicable interval so a slow request never outlives its cycle.
    pub request_timeout: Option<Duration>,
    /// Never let `last_seen_count` decrease, whether written locally or
    /// received from another writer.
    pub monotonic_seen: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            interval_foreground: DEFAULT_INTERVAL_FOREGROUND,
            interval_background: DEFAULT_INTERVAL_BACKGROUND,
            paused: false,
            namespace: DEFAULT_NAMESPACE.to_string(),
            request_timeout: None,
            monotonic_seen: false,
        }
    }
}

impl PollerConfig {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    /// Interval for the current visibility.
    pub fn interval(&self, visible: bool) -> Duration {
        if visible {
            self.interval_foreground
        } else {
            self.interval_background
        }
    }

    /// Timeout for a request issued under `interval`.
    pub fn timeout_for(&self, interval: Duration) -> Duration {
        self.request_timeout.unwrap_or(interval)
    }
}

/// Persisted key for an identity: `<namespace>:<user_id or anon>`.
///
/// Blank user ids fall back to the anonymous scope.
pub fn storage_key(namespace: &str, user_id: Option<&str>) -> String {
    let scope = user_id
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(ANONYMOUS_SCOPE);
    format!("{namespace}:{scope}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_dashboard_cadence() {
        let cfg = PollerConfig::default();
        assert_eq!(cfg.interval_foreground, Duration::from_secs(45));
        assert_eq!(cfg.interval_background, Duration::from_secs(120));
        assert!(!cfg.paused);
        assert!(cfg.user_id.is_none());
    }

    #[test]
    fn interval_follows_visibility() {
        let cfg = PollerConfig::default();
        assert_eq!(cfg.interval(true), cfg.interval_foreground);
        assert_eq!(cfg.interval(false), cfg.interval_background);
    }

    #[test]
    fn timeout_defaults_to_interval() {
        let mut cfg = PollerConfig::default();
        assert_eq!(cfg.timeout_for(Duration::from_secs(7)), Duration::from_secs(7));
        cfg.request_timeout = Some(Duration::from_secs(2));
        assert_eq!(cfg.timeout_for(Duration::from_secs(7)), Duration::from_secs(2));
    }

    #[test]
    fn storage_key_scopes_by_user() {
        assert_eq!(storage_key("ns", Some("42")), "ns:42");
        assert_eq!(storage_key("ns", None), "ns:anon");
        assert_eq!(storage_key("ns", Some("  ")), "ns:anon");
    }
}
