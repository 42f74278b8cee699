//! cachet Storage - Engine Trait, Client Facade and Memory Engine
//!
//! The policy engine never touches a backend directly. It goes through a
//! [`Client`], which scopes keys to a partition and hands typed records
//! back. Backends implement [`CacheEngine`].

pub mod client;
pub mod engine;
pub mod memory;
pub mod partition_key;

pub use client::{Client, ClientOptions, DEFAULT_PARTITION};
pub use engine::{CacheEngine, EngineFactory, EngineRecord, EngineSource};
pub use memory::{MemoryEngine, MemoryEngineConfig, MemoryStats};
pub use partition_key::PartitionedKey;
