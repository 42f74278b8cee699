//! Item identifiers and cache keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a cached item within a segment.
///
/// Callers may pass anything that names an item: a string, or a value that
/// implements [`Identified`]. Everything is normalised into an `ItemId` at
/// the policy boundary, so the engine only ever sees [`CacheKey`]s. The empty
/// string is a valid id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&String> for ItemId {
    fn from(id: &String) -> Self {
        Self(id.clone())
    }
}

impl From<&ItemId> for ItemId {
    fn from(id: &ItemId) -> Self {
        id.clone()
    }
}

/// Types that carry their own cache identifier.
///
/// Implement this for request structs so they can be handed to the policy
/// directly via [`ItemId::of`].
pub trait Identified {
    fn cache_id(&self) -> &str;
}

impl ItemId {
    /// Build an id from any [`Identified`] value.
    pub fn of<I: Identified + ?Sized>(item: &I) -> Self {
        Self(item.cache_id().to_string())
    }
}

/// A key identifying a stored item within a partition.
///
/// The segment is validated by the engine (naming rules are backend
/// specific); the id is opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub segment: String,
    pub id: String,
}

impl CacheKey {
    pub fn new(segment: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            segment: segment.into(),
            id: id.into(),
        }
    }

    /// Key for an item of the given segment.
    pub fn for_item(segment: &str, id: &ItemId) -> Self {
        Self::new(segment, id.as_str())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UserRequest {
        user_id: String,
    }

    impl Identified for UserRequest {
        fn cache_id(&self) -> &str {
            &self.user_id
        }
    }

    #[test]
    fn test_item_id_conversions() {
        let owned = String::from("abc");
        assert_eq!(ItemId::from("abc"), ItemId::from(owned.clone()));
        assert_eq!(ItemId::from(&owned).as_str(), "abc");
        assert_eq!(ItemId::from("").as_str(), "");
    }

    #[test]
    fn test_item_id_of_identified() {
        let request = UserRequest {
            user_id: "user-7".to_string(),
        };
        assert_eq!(ItemId::of(&request), ItemId::new("user-7"));
    }

    #[test]
    fn test_cache_key_display() {
        let key = CacheKey::for_item("users", &ItemId::new("42"));
        assert_eq!(key.to_string(), "users:42");
        assert_eq!(key.segment, "users");
        assert_eq!(key.id, "42");
    }
}
