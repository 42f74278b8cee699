//! Partition-scoped cache client.
//!
//! The client wraps one [`CacheEngine`], prefixes every key with its
//! partition, and turns raw engine records into typed [`StoredRecord`]s
//! carrying the *remaining* ttl.

use std::sync::Arc;
use std::time::Duration;

use cachet_core::clock::{add_duration, duration_between};
use cachet_core::{
    system_clock, CacheKey, CachetResult, Clock, StorageError, StoredRecord, ValidationError,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::engine::{CacheEngine, EngineSource};
use crate::partition_key::PartitionedKey;

/// Default partition name.
pub const DEFAULT_PARTITION: &str = "cachet";

const DISCONNECTED: &str = "disconnected";

/// Options for constructing a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Namespace isolating this client's keys within a shared backend.
    pub partition: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            partition: DEFAULT_PARTITION.to_string(),
        }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = partition.into();
        self
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.partition.is_empty() || self.partition.contains('\0') {
            return Err(ValidationError::InvalidValue {
                field: "partition".to_string(),
                value: self.partition.clone(),
                reason: "partition must be non-empty and free of null characters".to_string(),
            });
        }
        Ok(())
    }
}

/// Cache facade over a single engine.
pub struct Client {
    engine: Arc<dyn CacheEngine>,
    partition: String,
    clock: Arc<dyn Clock>,
}

impl Client {
    /// Build a client from an engine instance or factory.
    pub fn new(source: impl Into<EngineSource>, options: ClientOptions) -> CachetResult<Self> {
        options.validate()?;
        let engine = source.into().into_engine()?;
        Ok(Self {
            engine,
            partition: options.partition,
            clock: system_clock(),
        })
    }

    /// Use `clock` to compute remaining ttls.
    ///
    /// Should match the clock the engine stamps records with.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub async fn start(&self) -> CachetResult<()> {
        self.engine.start().await?;
        info!(partition = %self.partition, "cache client started");
        Ok(())
    }

    pub async fn stop(&self) -> CachetResult<()> {
        self.engine.stop().await?;
        info!(partition = %self.partition, "cache client stopped");
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.engine.is_ready()
    }

    pub fn validate_segment_name(&self, segment: &str) -> Result<(), ValidationError> {
        if segment.is_empty() {
            return Err(ValidationError::InvalidSegment {
                segment: segment.to_string(),
                reason: "segment name cannot be empty".to_string(),
            });
        }
        self.engine.validate_segment_name(segment)
    }

    fn scoped(&self, key: &CacheKey) -> PartitionedKey {
        PartitionedKey::new(self.partition.clone(), key.clone())
    }

    /// Read an item.
    ///
    /// Returns `None` when the key is absent or its remaining ttl is zero.
    /// A stored value that does not decode as `T` is a read error.
    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> CachetResult<Option<StoredRecord<T>>> {
        let scoped = self.scoped(key);
        if !self.is_ready() {
            return Err(StorageError::Read {
                key: scoped.to_string(),
                reason: DISCONNECTED.to_string(),
            }
            .into());
        }

        let Some(record) = self.engine.get(&scoped).await? else {
            return Ok(None);
        };

        let now = self.clock.now();
        let remaining = duration_between(now, add_duration(record.stored, record.ttl));
        if remaining.is_zero() {
            debug!(key = %scoped, "cached item has no remaining ttl");
            return Ok(None);
        }

        let item = serde_json::from_value(record.item).map_err(|e| StorageError::Read {
            key: scoped.to_string(),
            reason: format!("malformed stored value: {}", e),
        })?;

        Ok(Some(StoredRecord::new(item, record.stored, remaining)))
    }

    /// Store an item for `ttl`. A zero ttl is not cacheable and is skipped.
    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration) -> CachetResult<()> {
        let scoped = self.scoped(key);
        if !self.is_ready() {
            return Err(StorageError::Write {
                key: scoped.to_string(),
                reason: DISCONNECTED.to_string(),
            }
            .into());
        }
        if ttl.is_zero() {
            return Ok(());
        }

        let value = serde_json::to_value(value).map_err(|e| StorageError::Write {
            key: scoped.to_string(),
            reason: format!("value is not serializable: {}", e),
        })?;
        self.engine.set(&scoped, value, ttl).await
    }

    pub async fn delete(&self, key: &CacheKey) -> CachetResult<()> {
        let scoped = self.scoped(key);
        if !self.is_ready() {
            return Err(StorageError::Delete {
                key: scoped.to_string(),
                reason: DISCONNECTED.to_string(),
            }
            .into());
        }
        self.engine.delete(&scoped).await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("partition", &self.partition)
            .field("ready", &self.is_ready())
            .finish()
    }
}
