//! Retry schedule after failed count requests.

use std::time::Duration;

/// Longest delay between attempts, however many failures in a row.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Delay before the next attempt after `failure_streak` consecutive failures.
///
/// The first failure waits twice the interval and each further failure
/// doubles it again, capped at [`MAX_BACKOFF`]. A streak of zero is the
/// regular interval.
pub fn failure_delay(interval: Duration, failure_streak: u32) -> Duration {
    if failure_streak == 0 {
        return interval;
    }
    let factor = 1u32.checked_shl(failure_streak.min(31)).unwrap_or(u32::MAX);
    interval.saturating_mul(factor).min(MAX_BACKOFF)
}
