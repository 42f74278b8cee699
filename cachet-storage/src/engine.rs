//! Cache engine trait.
//!
//! This module defines the capability set every cache backend must provide.
//! The policy engine never talks to an engine directly; it goes through the
//! [`Client`](crate::Client) facade.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cachet_core::{CachetResult, Timestamp, ValidationError};
use serde_json::Value;

use crate::partition_key::PartitionedKey;

/// A raw record as returned by an engine.
///
/// `ttl` is the lifetime granted when the item was written, not the
/// remaining lifetime; the client derives the latter.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineRecord {
    pub item: Value,
    pub stored: Timestamp,
    pub ttl: Duration,
}

/// Cache engine trait for pluggable cache implementations.
///
/// This trait abstracts over different cache backends (in-memory maps,
/// networked cache servers, embedded stores). Implementations must be
/// thread-safe and support concurrent access; the caller provides no
/// ordering between operations.
///
/// # Serialization
///
/// Values cross this boundary as `serde_json::Value`. How they are laid out
/// in the backend is entirely the engine's concern.
#[async_trait]
pub trait CacheEngine: Send + Sync {
    /// Connect to the backend. Must be called before any other operation.
    async fn start(&self) -> CachetResult<()>;

    /// Disconnect from the backend.
    async fn stop(&self) -> CachetResult<()>;

    /// Whether the engine is connected and able to serve requests.
    fn is_ready(&self) -> bool;

    /// Check a segment name against backend-specific naming rules.
    fn validate_segment_name(&self, segment: &str) -> Result<(), ValidationError>;

    /// Read an item. Returns `None` when the key is absent or expired.
    async fn get(&self, key: &PartitionedKey) -> CachetResult<Option<EngineRecord>>;

    /// Store an item for `ttl`.
    async fn set(&self, key: &PartitionedKey, value: Value, ttl: Duration) -> CachetResult<()>;

    /// Remove an item. Removing an absent item is not an error.
    async fn delete(&self, key: &PartitionedKey) -> CachetResult<()>;
}

/// Deferred engine construction.
pub type EngineFactory = Box<dyn FnOnce() -> CachetResult<Arc<dyn CacheEngine>> + Send>;

/// Where a client gets its engine from: a ready instance, or a factory
/// invoked once when the client is built.
pub enum EngineSource {
    Instance(Arc<dyn CacheEngine>),
    Factory(EngineFactory),
}

impl EngineSource {
    pub fn factory<F>(f: F) -> Self
    where
        F: FnOnce() -> CachetResult<Arc<dyn CacheEngine>> + Send + 'static,
    {
        Self::Factory(Box::new(f))
    }

    pub(crate) fn into_engine(self) -> CachetResult<Arc<dyn CacheEngine>> {
        match self {
            Self::Instance(engine) => Ok(engine),
            Self::Factory(build) => build(),
        }
    }
}

impl<E: CacheEngine + 'static> From<Arc<E>> for EngineSource {
    fn from(engine: Arc<E>) -> Self {
        Self::Instance(engine)
    }
}

impl fmt::Debug for EngineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(_) => f.write_str("EngineSource::Instance"),
            Self::Factory(_) => f.write_str("EngineSource::Factory"),
        }
    }
}
