//! cachet Policy - Cache-Aside Policy Engine
//!
//! Sits above a [`cachet_storage::Client`] and adds what a raw cache client
//! cannot do alone:
//!
//! - value generation on miss, with at most one generator call in flight per
//!   id no matter how many callers are waiting
//! - stale records served after `stale_timeout` while regeneration proceeds
//! - `expires_in` / `expires_at` expiration and fixed or dynamic staleness
//! - per-call generate timeouts and a per-id generation cool-down
//! - counters, per-call reports and an error event channel
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use cachet_core::{GenerateTimeout, PolicyConfig};
//! use cachet_policy::{Generated, Policy};
//! use cachet_storage::{Client, ClientOptions, MemoryEngine};
//!
//! # async fn run() -> cachet_core::CachetResult<()> {
//! let client = Arc::new(Client::new(Arc::new(MemoryEngine::default()), ClientOptions::default())?);
//! client.start().await?;
//!
//! let policy = Policy::<String>::builder("greetings")
//!     .client(client)
//!     .generator(|id: String| async move {
//!         Ok::<_, cachet_core::CachetError>(Generated::new(format!("hello {id}")))
//!     })
//!     .rules(
//!         PolicyConfig::new()
//!             .with_expires_in(Duration::from_secs(60))
//!             .with_stale_in(Duration::from_secs(30))
//!             .with_stale_timeout(Duration::from_millis(50))
//!             .with_generate_timeout(GenerateTimeout::After(Duration::from_secs(1))),
//!     )
//!     .build()?;
//!
//! let read = policy.get("world").await?;
//! assert_eq!(read.value.as_deref(), Some("hello world"));
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod generator;
mod pending;
pub mod policy;
pub mod report;
pub mod stats;

pub use events::PolicyEvent;
pub use generator::{Generated, Generator};
pub use policy::{CacheValue, Policy, PolicyBuilder};
pub use report::{GetFailure, GetReport, Outcome, PolicyRead};
pub use stats::{PolicyStats, StatsSnapshot};

pub use cachet_core::{
    CacheKey, CachetError, CachetResult, DailyCutoff, GenerateError, GenerateTimeout, ItemId,
    PolicyConfig, PolicyRules, StorageError, ValidationError,
};
