//! Results of a policy read.

use std::time::Duration;

use cachet_core::{CachetError, StoredRecord, Timestamp};
use thiserror::Error;

/// How a `get` was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Fresh cached value.
    Hit,
    /// Cached value past its staleness point.
    StaleHit,
    /// Value produced by the generator during this call.
    Generated,
    /// Nothing cached and nothing generated.
    Miss,
}

/// Timing and state of the cache read behind a `get`.
///
/// For a generated value `stored` and `ttl` describe the new value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GetReport {
    /// Wall-clock duration of the cache read in milliseconds.
    pub msec: f64,
    pub stored: Option<Timestamp>,
    pub is_stale: bool,
    /// Remaining ttl.
    pub ttl: Duration,
    /// Non-fatal error encountered along the way.
    pub error: Option<CachetError>,
}

impl GetReport {
    pub(crate) fn with_record<T>(mut self, record: &StoredRecord<T>, is_stale: bool) -> Self {
        self.stored = Some(record.stored);
        self.ttl = record.ttl;
        self.is_stale = is_stale;
        self
    }
}

/// Successful result of `Policy::get`.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyRead<T> {
    pub value: Option<T>,
    pub outcome: Outcome,
    pub report: GetReport,
}

impl<T> PolicyRead<T> {
    /// Resolve from whatever the cache held, without generating.
    pub(crate) fn from_cache(cached: Option<StoredRecord<T>>, report: GetReport) -> Self {
        match cached {
            Some(record) => Self {
                value: Some(record.item),
                outcome: if report.is_stale {
                    Outcome::StaleHit
                } else {
                    Outcome::Hit
                },
                report,
            },
            None => Self {
                value: None,
                outcome: Outcome::Miss,
                report,
            },
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self.outcome, Outcome::Hit | Outcome::StaleHit)
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }
}

/// Failed `Policy::get`, with the report of the call.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("policy read failed")]
pub struct GetFailure {
    #[source]
    pub error: CachetError,
    pub report: GetReport,
}

impl GetFailure {
    pub(crate) fn new(error: CachetError, mut report: GetReport) -> Self {
        report.error = Some(error.clone());
        Self { error, report }
    }

    pub fn is_timeout(&self) -> bool {
        self.error.is_generate_timeout()
    }
}

impl From<GetFailure> for CachetError {
    fn from(failure: GetFailure) -> Self {
        failure.error
    }
}
