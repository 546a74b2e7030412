//! Wall-clock and duration helpers.
//!
//! Shared state carries wall-clock epoch milliseconds so that every client
//! can recompute the authoritative playback position from a snapshot plus
//! its own clock; these helpers keep those conversions in one place.

use chrono::Utc;
use std::time::Duration;

/// Current wall-clock time as epoch milliseconds.
#[must_use]
pub fn epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Seconds elapsed between two epoch-millisecond instants.
///
/// Clock skew can make `to_ms` earlier than `from_ms`; the result is
/// clamped at zero so a skewed clock never rewinds a playback position.
#[must_use]
pub fn elapsed_secs(from_ms: i64, to_ms: i64) -> f64 {
    let delta = to_ms.saturating_sub(from_ms);
    if delta <= 0 {
        0.0
    } else {
        delta as f64 / 1000.0
    }
}

/// Extension trait for safe `Duration` conversions.
pub trait DurationExt {
    /// Convert duration to milliseconds as u64, saturating at `u64::MAX`.
    fn as_millis_u64(&self) -> u64;
}

impl DurationExt for Duration {
    fn as_millis_u64(&self) -> u64 {
        u64::try_from(self.as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_secs() {
        assert_eq!(elapsed_secs(1000, 4000), 3.0);
    }

    #[test]
    fn test_elapsed_secs_clamped_on_skew() {
        // A consumer clock behind the producer clock must not rewind.
        assert_eq!(elapsed_secs(5000, 4000), 0.0);
    }

    #[test]
    fn test_as_millis_u64() {
        assert_eq!(Duration::from_millis(1234).as_millis_u64(), 1234);
    }
}
