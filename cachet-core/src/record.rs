//! Records read back from the cache.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::Timestamp;

/// An item read through the cache facade.
///
/// `stored` is assigned by the backend at write time and `ttl` is the
/// lifetime remaining when the record was read. Records with no remaining
/// lifetime are never produced; they read as not-found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord<T> {
    pub item: T,
    pub stored: Timestamp,
    pub ttl: Duration,
}

impl<T> StoredRecord<T> {
    pub fn new(item: T, stored: Timestamp, ttl: Duration) -> Self {
        Self { item, stored, ttl }
    }

    /// Map the inner item to a new type.
    pub fn map<U, F>(self, f: F) -> StoredRecord<U>
    where
        F: FnOnce(T) -> U,
    {
        StoredRecord {
            item: f(self.item),
            stored: self.stored,
            ttl: self.ttl,
        }
    }
}
