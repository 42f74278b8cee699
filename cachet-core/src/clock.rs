//! Time sources.
//!
//! Storage timestamps and ttl arithmetic go through a [`Clock`] so that
//! engines, the client and the policy agree on "now". Timers always use
//! `tokio::time`.

use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use crate::Timestamp;

/// Source of wall-clock timestamps.
pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Reads the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Wall clock that advances with `tokio::time::Instant`.
///
/// Anchored to the system clock when created. Under a paused tokio runtime
/// it moves exactly as far as tokio's timers do, which keeps timestamps and
/// timeouts consistent in tests.
#[derive(Debug, Clone)]
pub struct TokioClock {
    anchor: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            anchor: Utc::now(),
            started: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Timestamp {
        add_duration(self.anchor, self.started.elapsed())
    }
}

/// Shared default clock.
pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// Convert a std duration to chrono, saturating on overflow.
pub fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// `timestamp + duration`, saturating at the latest representable instant.
pub fn add_duration(timestamp: Timestamp, duration: Duration) -> Timestamp {
    timestamp
        .checked_add_signed(chrono_duration(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Positive part of `later - earlier` as a std duration.
pub fn duration_between(earlier: Timestamp, later: Timestamp) -> Duration {
    (later - earlier).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_between_floors_at_zero() {
        let now = Utc::now();
        let later = now + chrono::Duration::milliseconds(250);
        assert_eq!(duration_between(now, later), Duration::from_millis(250));
        assert_eq!(duration_between(later, now), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let clock = TokioClock::new();
        let before = clock.now();
        tokio::time::advance(Duration::from_millis(600)).await;
        let after = clock.now();
        assert_eq!(duration_between(before, after), Duration::from_millis(600));
    }
}
