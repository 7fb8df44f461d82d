//! Poll state, the derived `has_new` flag, and value coercion.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// What consumers of the poller see.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub has_new: bool,
    pub current_count: u64,
    pub last_seen_count: Option<u64>,
    pub user_id: Option<String>,
    /// Consecutive failed requests; reset by the next success.
    pub failure_streak: u32,
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Mutable poll state owned by one poller.
#[derive(Debug, Clone, Default)]
pub(crate) struct PollState {
    pub current_count: u64,
    pub last_seen_count: Option<u64>,
    pub failure_streak: u32,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl PollState {
    pub fn has_new(&self) -> bool {
        has_new(self.current_count, self.last_seen_count)
    }

    pub fn snapshot(&self, user_id: Option<&str>) -> Snapshot {
        Snapshot {
            has_new: self.has_new(),
            current_count: self.current_count,
            last_seen_count: self.last_seen_count,
            user_id: user_id.map(str::to_string),
            failure_streak: self.failure_streak,
            last_success_at: self.last_success_at,
        }
    }

    /// Apply an acknowledgment, honouring the monotonic policy.
    pub fn acknowledge(&mut self, seen: u64, monotonic: bool) -> u64 {
        let seen = match (monotonic, self.last_seen_count) {
            (true, Some(prev)) => prev.max(seen),
            _ => seen,
        };
        self.last_seen_count = Some(seen);
        seen
    }
}

/// `true` iff something was acknowledged and the count grew past it.
///
/// Nothing acknowledged yet (first run) never shows as new.
pub fn has_new(current_count: u64, last_seen_count: Option<u64>) -> bool {
    matches!(last_seen_count, Some(seen) if current_count > seen)
}

/// Parse a persisted count. Anything that is not a non-negative number is 0.
pub fn parse_count(raw: &str) -> u64 {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<u64>() {
        return n;
    }
    raw.parse::<f64>().map(float_to_count).unwrap_or(0)
}

/// Coerce a JSON value from the server into a count.
pub fn coerce_count(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().map(float_to_count))
            .unwrap_or(0),
        Some(Value::String(s)) => parse_count(s),
        _ => 0,
    }
}

/// Look up `path` (dot separated) in a JSON body and coerce it.
pub fn count_at(body: &Value, path: &str) -> u64 {
    let found = path
        .split('.')
        .filter(|seg| !seg.is_empty())
        .try_fold(body, |node, seg| node.get(seg));
    coerce_count(found)
}

fn float_to_count(f: f64) -> u64 {
    if f.is_finite() && f >= 0.0 {
        f.trunc() as u64
    } else {
        0
    }
}
