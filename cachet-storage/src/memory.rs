//! In-process cache engine.
//!
//! Items live in an ordered map keyed by [`PartitionedKey::encode`], so a
//! whole segment can be cleared with a single range scan. Expired items are
//! dropped lazily on read and purged in bulk when the engine runs out of
//! room.
//!
//! # Thread Safety
//!
//! The map sits behind an `RwLock`; reads take the shared lock and only
//! upgrade to the exclusive lock to discard an expired item. Statistics are
//! plain atomic counters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use cachet_core::clock::add_duration;
use cachet_core::{system_clock, CachetResult, Clock, StorageError, Timestamp, ValidationError};
use serde_json::Value;

use crate::engine::{CacheEngine, EngineRecord};
use crate::partition_key::PartitionedKey;

/// Configuration for the in-memory engine.
#[derive(Debug, Clone, Default)]
pub struct MemoryEngineConfig {
    /// Maximum number of live entries. Zero means unbounded.
    pub max_entries: usize,
}

impl MemoryEngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }
}

/// Statistics about the in-memory engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: u64,
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    item: Value,
    stored: Timestamp,
    ttl: Duration,
}

impl MemoryEntry {
    fn is_expired(&self, now: Timestamp) -> bool {
        now >= add_duration(self.stored, self.ttl)
    }
}

/// In-memory cache engine.
///
/// Not ready until [`start`](CacheEngine::start) is called; `stop` discards
/// all content.
#[derive(Debug)]
pub struct MemoryEngine {
    config: MemoryEngineConfig,
    clock: Arc<dyn Clock>,
    entries: RwLock<BTreeMap<Vec<u8>, MemoryEntry>>,
    ready: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryEngine {
    pub fn new(config: MemoryEngineConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: MemoryEngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            entries: RwLock::new(BTreeMap::new()),
            ready: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get engine statistics.
    pub fn stats(&self) -> MemoryStats {
        let entry_count = self
            .entries
            .read()
            .map(|entries| entries.len() as u64)
            .unwrap_or(0);
        MemoryStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count,
        }
    }

    /// Remove every item of a segment. Returns the number removed.
    pub fn clear_segment(&self, partition: &str, segment: &str) -> CachetResult<u64> {
        let prefix = PartitionedKey::segment_prefix(partition, segment);
        let mut entries = self.entries.write().map_err(|_| StorageError::Delete {
            key: format!("{}:{}", partition, segment),
            reason: "memory engine lock poisoned".to_string(),
        })?;

        let keys: Vec<Vec<u8>> = entries
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            entries.remove(key);
        }
        Ok(keys.len() as u64)
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> u64 {
        let now = self.clock.now();
        match self.entries.write() {
            Ok(mut entries) => purge(&mut entries, now),
            Err(_) => 0,
        }
    }

    fn not_ready(key: &PartitionedKey, make: fn(String, String) -> StorageError) -> StorageError {
        make(key.to_string(), "memory engine not started".to_string())
    }
}

fn purge(entries: &mut BTreeMap<Vec<u8>, MemoryEntry>, now: Timestamp) -> u64 {
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now));
    (before - entries.len()) as u64
}

fn read_error(key: String, reason: String) -> StorageError {
    StorageError::Read { key, reason }
}

fn write_error(key: String, reason: String) -> StorageError {
    StorageError::Write { key, reason }
}

fn delete_error(key: String, reason: String) -> StorageError {
    StorageError::Delete { key, reason }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new(MemoryEngineConfig::default())
    }
}

#[async_trait]
impl CacheEngine for MemoryEngine {
    async fn start(&self) -> CachetResult<()> {
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> CachetResult<()> {
        self.ready.store(false, Ordering::SeqCst);
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn validate_segment_name(&self, segment: &str) -> Result<(), ValidationError> {
        if segment.is_empty() {
            return Err(ValidationError::InvalidSegment {
                segment: segment.to_string(),
                reason: "segment name cannot be empty".to_string(),
            });
        }
        if segment.contains('\0') {
            return Err(ValidationError::InvalidSegment {
                segment: segment.to_string(),
                reason: "segment name cannot contain null characters".to_string(),
            });
        }
        Ok(())
    }

    async fn get(&self, key: &PartitionedKey) -> CachetResult<Option<EngineRecord>> {
        if !self.is_ready() {
            return Err(Self::not_ready(key, read_error).into());
        }

        let encoded = key.encode();
        let now = self.clock.now();

        let found = {
            let entries = self
                .entries
                .read()
                .map_err(|_| read_error(key.to_string(), "memory engine lock poisoned".to_string()))?;
            entries.get(&encoded).cloned()
        };

        match found {
            Some(entry) if !entry.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(EngineRecord {
                    item: entry.item,
                    stored: entry.stored,
                    ttl: entry.ttl,
                }))
            }
            Some(_) => {
                if let Ok(mut entries) = self.entries.write() {
                    if entries.get(&encoded).is_some_and(|entry| entry.is_expired(now)) {
                        entries.remove(&encoded);
                    }
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &PartitionedKey, value: Value, ttl: Duration) -> CachetResult<()> {
        if !self.is_ready() {
            return Err(Self::not_ready(key, write_error).into());
        }

        let encoded = key.encode();
        let now = self.clock.now();
        let mut entries = self
            .entries
            .write()
            .map_err(|_| write_error(key.to_string(), "memory engine lock poisoned".to_string()))?;

        let max = self.config.max_entries;
        if max > 0 && !entries.contains_key(&encoded) && entries.len() >= max {
            purge(&mut entries, now);
            if entries.len() >= max {
                return Err(write_error(
                    key.to_string(),
                    format!("memory engine is full ({} entries)", max),
                )
                .into());
            }
        }

        entries.insert(
            encoded,
            MemoryEntry {
                item: value,
                stored: now,
                ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &PartitionedKey) -> CachetResult<()> {
        if !self.is_ready() {
            return Err(Self::not_ready(key, delete_error).into());
        }

        let mut entries = self
            .entries
            .write()
            .map_err(|_| delete_error(key.to_string(), "memory engine lock poisoned".to_string()))?;
        entries.remove(&key.encode());
        Ok(())
    }
}
