//! Partition-scoped keys handed to cache engines.
//!
//! A `PartitionedKey` can only be built from a partition name and a
//! [`CacheKey`], so no engine call can address an item without naming the
//! partition it belongs to.

use std::fmt;

use cachet_core::CacheKey;

/// Separator byte between key components. Never valid inside UTF-8 text.
const SEPARATOR: u8 = 0xFF;

/// A cache key scoped to a partition.
///
/// # Binary Format
///
/// `encode()` produces `[partition][0xFF][segment][0xFF][id]`. Since the
/// components are UTF-8, the separator cannot occur inside them, and keys
/// sort by partition, then segment, then id. Engines can range-scan a
/// segment with [`PartitionedKey::segment_prefix`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionedKey {
    inner: PartitionedKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PartitionedKeyInner {
    partition: String,
    key: CacheKey,
}

impl PartitionedKey {
    pub fn new(partition: impl Into<String>, key: CacheKey) -> Self {
        Self {
            inner: PartitionedKeyInner {
                partition: partition.into(),
                key,
            },
        }
    }

    pub fn partition(&self) -> &str {
        &self.inner.partition
    }

    pub fn segment(&self) -> &str {
        &self.inner.key.segment
    }

    pub fn id(&self) -> &str {
        &self.inner.key.id
    }

    pub fn cache_key(&self) -> &CacheKey {
        &self.inner.key
    }

    /// Encode this key for byte-keyed storage.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Self::segment_prefix(self.partition(), self.segment());
        bytes.extend_from_slice(self.id().as_bytes());
        bytes
    }

    /// Prefix shared by every key of a segment, including the trailing separator.
    pub fn segment_prefix(partition: &str, segment: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(partition.len() + segment.len() + 2);
        prefix.extend_from_slice(partition.as_bytes());
        prefix.push(SEPARATOR);
        prefix.extend_from_slice(segment.as_bytes());
        prefix.push(SEPARATOR);
        prefix
    }
}

impl fmt::Display for PartitionedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.partition(), self.inner.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_and_getters() {
        let key = PartitionedKey::new("app", CacheKey::new("users", "42"));
        assert_eq!(key.partition(), "app");
        assert_eq!(key.segment(), "users");
        assert_eq!(key.id(), "42");
        assert_eq!(key.to_string(), "app:users:42");
    }

    #[test]
    fn test_encode_layout() {
        let key = PartitionedKey::new("p", CacheKey::new("s", "id"));
        assert_eq!(key.encode(), vec![b'p', SEPARATOR, b's', SEPARATOR, b'i', b'd']);
    }

    #[test]
    fn test_encode_starts_with_segment_prefix() {
        let key = PartitionedKey::new("app", CacheKey::new("users", ""));
        let prefix = PartitionedKey::segment_prefix("app", "users");
        assert!(key.encode().starts_with(&prefix));
        assert_eq!(key.encode(), prefix);
    }

    #[test]
    fn test_different_partitions_different_keys() {
        let key = CacheKey::new("users", "42");
        let a = PartitionedKey::new("one", key.clone());
        let b = PartitionedKey::new("two", key);
        assert_ne!(a.encode(), b.encode());
        assert_ne!(a, b);
    }

    #[test]
    fn test_component_boundaries_are_unambiguous() {
        // "a:b" + "c" must not collide with "a" + "b:c".
        let a = PartitionedKey::new("p", CacheKey::new("a:b", "c"));
        let b = PartitionedKey::new("p", CacheKey::new("a", "b:c"));
        assert_ne!(a.encode(), b.encode());
    }
}
