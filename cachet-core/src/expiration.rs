//! Expiration and staleness rules.
//!
//! An [`ExpirationRule`] decides how long a freshly stored item lives; a
//! [`StalenessRule`] decides when, inside that window, the item stops being
//! fresh and becomes eligible for background regeneration.

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{add_duration, duration_between};
use crate::error::ValidationError;
use crate::Timestamp;

/// A local wall-clock time of day, written `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DailyCutoff {
    hour: u32,
    minute: u32,
}

impl DailyCutoff {
    pub fn new(hour: u32, minute: u32) -> Result<Self, ValidationError> {
        if hour > 23 || minute > 59 {
            return Err(ValidationError::InvalidValue {
                field: "expires_at".to_string(),
                value: format!("{}:{}", hour, minute),
                reason: "hour must be 0-23 and minute 0-59".to_string(),
            });
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    fn time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }

    /// First occurrence of this cutoff strictly after `stored`, in `tz`.
    ///
    /// An item stored at or past the cutoff on its calendar day expires at
    /// the cutoff on the following day.
    pub fn next_after<Tz: TimeZone>(&self, stored: Timestamp, tz: &Tz) -> Option<Timestamp> {
        let day = stored.with_timezone(tz).date_naive();
        if let Some(cutoff) = self.on_day(day, tz) {
            if cutoff > stored {
                return Some(cutoff);
            }
        }
        self.on_day(day.succ_opt()?, tz)
    }

    fn on_day<Tz: TimeZone>(&self, day: NaiveDate, tz: &Tz) -> Option<Timestamp> {
        let naive = day.and_time(self.time());
        resolve_local(tz, naive)
    }
}

// A cutoff inside a DST gap resolves to the first valid instant after it.
fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<Timestamp> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(naive + chrono::Duration::hours(1)))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
}

impl FromStr for DailyCutoff {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidValue {
            field: "expires_at".to_string(),
            value: s.to_string(),
            reason: "expected HH:MM".to_string(),
        };
        let (hour, minute) = s.split_once(':').ok_or_else(invalid)?;
        if hour.is_empty() || hour.len() > 2 || minute.len() != 2 {
            return Err(invalid());
        }
        if !hour.bytes().chain(minute.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let hour = hour.parse().map_err(|_| invalid())?;
        let minute = minute.parse().map_err(|_| invalid())?;
        Self::new(hour, minute)
    }
}

impl TryFrom<String> for DailyCutoff {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DailyCutoff> for String {
    fn from(cutoff: DailyCutoff) -> Self {
        cutoff.to_string()
    }
}

impl fmt::Display for DailyCutoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// How long a stored item lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationRule {
    /// Relative lifetime from storage time.
    ExpiresIn(Duration),
    /// Absolute daily cutoff in local time.
    ExpiresAt(DailyCutoff),
}

impl ExpirationRule {
    /// Remaining ttl for an item stored at `stored`, evaluated at `now`.
    pub fn ttl(&self, stored: Timestamp, now: Timestamp) -> Duration {
        self.ttl_in(stored, now, &Local)
    }

    /// Same as [`ttl`](Self::ttl) with an explicit time zone for `ExpiresAt`.
    pub fn ttl_in<Tz: TimeZone>(&self, stored: Timestamp, now: Timestamp, tz: &Tz) -> Duration {
        match self {
            Self::ExpiresIn(expires_in) => {
                duration_between(now, add_duration(stored, *expires_in))
            }
            Self::ExpiresAt(cutoff) => match cutoff.next_after(stored, tz) {
                Some(expires) => duration_between(now, expires),
                None => Duration::ZERO,
            },
        }
    }
}

/// Dynamic staleness: `(stored, remaining_ttl) -> stale_in`.
pub type StaleInFn = Arc<dyn Fn(Timestamp, Duration) -> Duration + Send + Sync>;

/// When a stored item turns from fresh to stale.
#[derive(Clone)]
pub enum StalenessRule {
    Fixed(Duration),
    Dynamic(StaleInFn),
}

impl StalenessRule {
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(Timestamp, Duration) -> Duration + Send + Sync + 'static,
    {
        Self::Dynamic(Arc::new(f))
    }

    /// The statically known staleness offset, if any.
    pub fn fixed(&self) -> Option<Duration> {
        match self {
            Self::Fixed(stale_in) => Some(*stale_in),
            Self::Dynamic(_) => None,
        }
    }

    pub fn stale_in(&self, stored: Timestamp, ttl: Duration) -> Duration {
        match self {
            Self::Fixed(stale_in) => *stale_in,
            Self::Dynamic(f) => f(stored, ttl),
        }
    }

    pub fn stale_at(&self, stored: Timestamp, ttl: Duration) -> Timestamp {
        add_duration(stored, self.stale_in(stored, ttl))
    }

    pub fn is_stale(&self, stored: Timestamp, ttl: Duration, now: Timestamp) -> bool {
        now >= self.stale_at(stored, ttl)
    }
}

impl fmt::Debug for StalenessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(stale_in) => f.debug_tuple("Fixed").field(stale_in).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(<fn>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use proptest::prelude::*;

    fn at(hour: u32, minute: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 10, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_daily_cutoff_parse() {
        assert_eq!("03:30".parse::<DailyCutoff>().unwrap(), DailyCutoff::new(3, 30).unwrap());
        assert_eq!("7:05".parse::<DailyCutoff>().unwrap(), DailyCutoff::new(7, 5).unwrap());
        assert!("24:00".parse::<DailyCutoff>().is_err());
        assert!("12:60".parse::<DailyCutoff>().is_err());
        assert!("12".parse::<DailyCutoff>().is_err());
        assert!("1a:00".parse::<DailyCutoff>().is_err());
        assert!("12:5".parse::<DailyCutoff>().is_err());
        assert_eq!(DailyCutoff::new(7, 5).unwrap().to_string(), "07:05");
    }

    #[test]
    fn test_expires_at_same_day() {
        let rule = ExpirationRule::ExpiresAt(DailyCutoff::new(18, 0).unwrap());
        let stored = at(10, 0);
        let ttl = rule.ttl_in(stored, stored, &Utc);
        assert_eq!(ttl, Duration::from_secs(8 * 3600));
    }

    #[test]
    fn test_expires_at_rolls_to_next_day() {
        let rule = ExpirationRule::ExpiresAt(DailyCutoff::new(6, 0).unwrap());
        let stored = at(10, 0);
        let ttl = rule.ttl_in(stored, stored, &Utc);
        assert_eq!(ttl, Duration::from_secs(20 * 3600));

        // Stored exactly at the cutoff counts as past it.
        let stored = at(6, 0);
        let ttl = rule.ttl_in(stored, stored, &Utc);
        assert_eq!(ttl, Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_expires_at_uses_local_offset() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let rule = ExpirationRule::ExpiresAt(DailyCutoff::new(12, 0).unwrap());
        // 09:00 UTC is 11:00 at +02:00, so one hour remains.
        let stored = at(9, 0);
        assert_eq!(rule.ttl_in(stored, stored, &tz), Duration::from_secs(3600));
    }

    #[test]
    fn test_expires_at_floors_at_zero() {
        let rule = ExpirationRule::ExpiresAt(DailyCutoff::new(12, 0).unwrap());
        let stored = at(11, 0);
        let now = at(13, 0);
        assert_eq!(rule.ttl_in(stored, now, &Utc), Duration::ZERO);
    }

    #[test]
    fn test_dynamic_staleness() {
        let rule = StalenessRule::dynamic(|_, ttl| ttl / 2);
        let stored = at(10, 0);
        let ttl = Duration::from_secs(60);
        assert_eq!(rule.stale_in(stored, ttl), Duration::from_secs(30));
        assert!(rule.fixed().is_none());
        assert!(!rule.is_stale(stored, ttl, stored + chrono::Duration::seconds(29)));
        assert!(rule.is_stale(stored, ttl, stored + chrono::Duration::seconds(30)));
    }

    proptest! {
        #[test]
        fn prop_expires_in_ttl_is_remaining_lifetime(
            expires_in_ms in 1u64..10_000_000,
            elapsed_ms in 0u64..20_000_000,
        ) {
            let rule = ExpirationRule::ExpiresIn(Duration::from_millis(expires_in_ms));
            let stored = at(0, 0);
            let now = stored + chrono::Duration::milliseconds(elapsed_ms as i64);
            let expected = Duration::from_millis(expires_in_ms.saturating_sub(elapsed_ms));
            prop_assert_eq!(rule.ttl(stored, now), expected);
        }

        #[test]
        fn prop_stale_exactly_at_stale_in(
            stale_in_ms in 1u64..1_000_000,
            ttl_ms in 1u64..2_000_000,
        ) {
            let rule = StalenessRule::Fixed(Duration::from_millis(stale_in_ms));
            let stored = at(0, 0);
            let ttl = Duration::from_millis(ttl_ms);
            let boundary = stored + chrono::Duration::milliseconds(stale_in_ms as i64);
            prop_assert!(!rule.is_stale(stored, ttl, boundary - chrono::Duration::milliseconds(1)));
            prop_assert!(rule.is_stale(stored, ttl, boundary));
        }

        #[test]
        fn prop_expires_at_within_one_day(hour in 0u32..24, minute in 0u32..60, offset_min in 0i64..1440) {
            let rule = ExpirationRule::ExpiresAt(DailyCutoff::new(hour, minute).unwrap());
            let stored = at(0, 0) + chrono::Duration::minutes(offset_min);
            let ttl = rule.ttl_in(stored, stored, &Utc);
            prop_assert!(ttl > Duration::ZERO);
            prop_assert!(ttl <= Duration::from_secs(24 * 3600));
        }
    }
}
