//! cachet Core - Types, Rules and Errors
//!
//! Pure data structures and rule evaluation shared by the storage facade and
//! the policy engine. This crate performs no I/O.

use chrono::{DateTime, Utc};

pub mod clock;
pub mod config;
pub mod error;
pub mod expiration;
pub mod key;
pub mod record;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

pub use clock::{system_clock, Clock, SystemClock, TokioClock};
pub use config::{GenerateTimeout, PolicyConfig, PolicyRules};
pub use error::{CachetError, CachetResult, GenerateError, StorageError, ValidationError};
pub use expiration::{DailyCutoff, ExpirationRule, StaleInFn, StalenessRule};
pub use key::{CacheKey, Identified, ItemId};
pub use record::StoredRecord;
