//! cachet Test Utilities
//!
//! Shared test infrastructure for the cachet workspace:
//! - `FaultyEngine`, a memory engine with switchable backend failures
//! - `ScriptedGenerator`, a generator with counted calls, delays and failures
//! - Fixtures for started clients on a paused-time clock
//! - Proptest strategies for policy configuration
//! - Assertions on policy reads

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cachet_core::{CachetResult, Clock, GenerateError, StorageError, TokioClock, ValidationError};
use cachet_policy::{Generated, Generator};
use cachet_storage::{
    CacheEngine, Client, ClientOptions, EngineRecord, MemoryEngine, MemoryEngineConfig,
    PartitionedKey,
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

pub use cachet_core::{CachetError, GenerateTimeout, PolicyConfig, PolicyRules};
pub use cachet_policy::{GetFailure, Outcome, Policy, PolicyRead};

/// Install a `tracing` subscriber honouring `RUST_LOG`. Safe to call from
/// every test.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("cachet_policy=debug,cachet_storage=debug,warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// FAULTY ENGINE
// ============================================================================

/// Memory engine whose reads, writes and deletes can be made to fail.
#[derive(Debug)]
pub struct FaultyEngine {
    inner: MemoryEngine,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
    gets: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

impl FaultyEngine {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: MemoryEngine::with_clock(MemoryEngineConfig::default(), clock),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            gets: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> u64 {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> u64 {
        self.deletes.load(Ordering::SeqCst)
    }

    /// The wrapped engine, for inspecting content without going through the
    /// failure switches.
    pub fn memory(&self) -> &MemoryEngine {
        &self.inner
    }
}

#[async_trait]
impl CacheEngine for FaultyEngine {
    async fn start(&self) -> CachetResult<()> {
        self.inner.start().await
    }

    async fn stop(&self) -> CachetResult<()> {
        self.inner.stop().await
    }

    fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    fn validate_segment_name(&self, segment: &str) -> Result<(), ValidationError> {
        self.inner.validate_segment_name(segment)
    }

    async fn get(&self, key: &PartitionedKey) -> CachetResult<Option<EngineRecord>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Read {
                key: key.to_string(),
                reason: "injected read failure".to_string(),
            }
            .into());
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &PartitionedKey, value: Value, ttl: Duration) -> CachetResult<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Write {
                key: key.to_string(),
                reason: "injected write failure".to_string(),
            }
            .into());
        }
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &PartitionedKey) -> CachetResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Delete {
                key: key.to_string(),
                reason: "injected delete failure".to_string(),
            }
            .into());
        }
        self.inner.delete(key).await
    }
}

// ============================================================================
// SCRIPTED GENERATOR
// ============================================================================

type Produce<T> = dyn Fn(u32) -> T + Send + Sync;

struct Script<T> {
    produce: Box<Produce<T>>,
    calls: AtomicU32,
    delay_ms: AtomicU64,
    ttl_ms: AtomicU64,
    failing: AtomicBool,
    panicking: AtomicBool,
}

/// Generator driven by test code.
///
/// Values come from a function of the 1-based call number. Clones share
/// state, so a test can keep a handle after handing one to a policy.
pub struct ScriptedGenerator<T> {
    script: Arc<Script<T>>,
}

impl<T> Clone for ScriptedGenerator<T> {
    fn clone(&self) -> Self {
        Self {
            script: self.script.clone(),
        }
    }
}

impl<T> ScriptedGenerator<T> {
    pub fn new<F>(produce: F) -> Self
    where
        F: Fn(u32) -> T + Send + Sync + 'static,
    {
        Self {
            script: Arc::new(Script {
                produce: Box::new(produce),
                calls: AtomicU32::new(0),
                delay_ms: AtomicU64::new(0),
                ttl_ms: AtomicU64::new(0),
                failing: AtomicBool::new(false),
                panicking: AtomicBool::new(false),
            }),
        }
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.set_delay(delay);
        self
    }

    pub fn with_ttl(self, ttl: Duration) -> Self {
        self.script
            .ttl_ms
            .store(ttl.as_millis() as u64, Ordering::SeqCst);
        self
    }

    pub fn set_delay(&self, delay: Duration) {
        self.script
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make subsequent calls fail with a `GenerateError::Failed`.
    pub fn set_failing(&self, failing: bool) {
        self.script.failing.store(failing, Ordering::SeqCst);
    }

    /// Make subsequent calls panic.
    pub fn set_panicking(&self, panicking: bool) {
        self.script.panicking.store(panicking, Ordering::SeqCst);
    }

    /// Number of times the generator has been invoked.
    pub fn calls(&self) -> u32 {
        self.script.calls.load(Ordering::SeqCst)
    }
}

impl ScriptedGenerator<String> {
    /// Produces `"v1"`, `"v2"`, ...
    pub fn versioned() -> Self {
        Self::new(|call| format!("v{}", call))
    }
}

#[async_trait]
impl<T: Send + 'static> Generator<T> for ScriptedGenerator<T> {
    async fn generate(&self, id: &str) -> CachetResult<Generated<T>> {
        let call = self.script.calls.fetch_add(1, Ordering::SeqCst) + 1;

        let delay = self.script.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.script.panicking.load(Ordering::SeqCst) {
            panic!("scripted generator panic for id '{}'", id);
        }
        if self.script.failing.load(Ordering::SeqCst) {
            return Err(GenerateError::failed(id, "scripted failure").into());
        }

        let value = (self.script.produce)(call);
        let ttl = match self.script.ttl_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        Ok(Generated { value, ttl })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Started clients over test engines.

    use super::*;

    /// A clock that follows paused tokio time.
    pub fn clock() -> Arc<dyn Clock> {
        Arc::new(TokioClock::new())
    }

    /// A started client over a fresh memory engine.
    pub async fn memory_client(clock: Arc<dyn Clock>) -> (Arc<MemoryEngine>, Arc<Client>) {
        let engine = Arc::new(MemoryEngine::with_clock(
            MemoryEngineConfig::default(),
            clock.clone(),
        ));
        let client = started(engine.clone(), clock).await;
        (engine, client)
    }

    /// A started client over a fault-injecting engine.
    pub async fn faulty_client(clock: Arc<dyn Clock>) -> (Arc<FaultyEngine>, Arc<Client>) {
        let engine = Arc::new(FaultyEngine::new(clock.clone()));
        let client = started(engine.clone(), clock).await;
        (engine, client)
    }

    async fn started<E: CacheEngine + 'static>(engine: Arc<E>, clock: Arc<dyn Clock>) -> Arc<Client> {
        let client = match Client::new(engine, ClientOptions::default()) {
            Ok(client) => client.with_clock(clock),
            Err(e) => panic!("failed to build test client: {}", e),
        };
        if let Err(e) = client.start().await {
            panic!("failed to start test client: {}", e);
        }
        Arc::new(client)
    }
}

// ============================================================================
// PROPTEST STRATEGIES
// ============================================================================

pub mod generators {
    //! Proptest strategies for cachet configuration and keys.

    use super::*;
    use cachet_core::ItemId;
    use proptest::prelude::*;

    /// Any item id, including the empty one.
    pub fn arb_item_id() -> impl Strategy<Value = ItemId> {
        "[a-z0-9:_-]{0,16}".prop_map(ItemId::new)
    }

    /// A segment name every engine accepts.
    pub fn arb_segment() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,15}"
    }

    /// A configuration that passes validation with a generator attached.
    pub fn arb_valid_config() -> impl Strategy<Value = PolicyConfig> {
        (2u64..100_000)
            .prop_flat_map(|expires_in| (Just(expires_in), proptest::option::of(1..expires_in)))
            .prop_flat_map(|(expires_in, stale_in)| {
                let stale_timeout = match stale_in {
                    Some(_) => proptest::option::of(1..expires_in).boxed(),
                    None => Just(None).boxed(),
                };
                (Just(expires_in), Just(stale_in), stale_timeout)
            })
            .prop_flat_map(|(expires_in, stale_in, stale_timeout)| {
                let floor = stale_timeout.unwrap_or(0) + 1;
                let generate_timeout = prop_oneof![
                    Just(GenerateTimeout::Disabled),
                    (floor..floor + 10_000)
                        .prop_map(|ms| GenerateTimeout::After(Duration::from_millis(ms))),
                ];
                (
                    Just(expires_in),
                    Just(stale_in),
                    Just(stale_timeout),
                    generate_timeout,
                    any::<bool>(),
                    any::<bool>(),
                    any::<bool>(),
                    0u64..1_000,
                )
            })
            .prop_map(
                |(
                    expires_in,
                    stale_in,
                    stale_timeout,
                    generate_timeout,
                    drop_on_error,
                    generate_on_read_error,
                    generate_ignore_write_error,
                    pending_generate_timeout,
                )| PolicyConfig {
                    expires_in: Some(Duration::from_millis(expires_in)),
                    expires_at: None,
                    stale_in: stale_in.map(Duration::from_millis),
                    stale_timeout: stale_timeout.map(Duration::from_millis),
                    generate_timeout: Some(generate_timeout),
                    drop_on_error,
                    generate_on_read_error,
                    generate_ignore_write_error,
                    pending_generate_timeout: Duration::from_millis(pending_generate_timeout),
                },
            )
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on policy reads.

    use super::*;
    use std::fmt::Debug;

    /// Assert a read produced `expected` with the given outcome.
    #[track_caller]
    pub fn assert_read<T: Debug + PartialEq>(
        result: &Result<PolicyRead<T>, GetFailure>,
        outcome: Outcome,
        expected: Option<&T>,
    ) {
        match result {
            Ok(read) => {
                assert_eq!(read.outcome, outcome, "unexpected outcome: {:?}", read);
                assert_eq!(read.value.as_ref(), expected, "unexpected value: {:?}", read);
            }
            Err(failure) => panic!("Expected {:?}, got failure: {:?}", outcome, failure),
        }
    }

    /// Assert a read failed with a generate timeout.
    #[track_caller]
    pub fn assert_timeout<T: Debug>(result: &Result<PolicyRead<T>, GetFailure>) {
        match result {
            Err(failure) if failure.is_timeout() => {}
            other => panic!("Expected generate timeout, got: {:?}", other),
        }
    }

    /// Assert a read failed with a backend error.
    #[track_caller]
    pub fn assert_storage_failure<T: Debug>(result: &Result<PolicyRead<T>, GetFailure>) {
        match result {
            Err(failure) if failure.error.is_storage() => {}
            other => panic!("Expected storage error, got: {:?}", other),
        }
    }

    /// Assert a read failed with a generator error.
    #[track_caller]
    pub fn assert_generator_failure<T: Debug>(result: &Result<PolicyRead<T>, GetFailure>) {
        match result {
            Err(GetFailure {
                error: CachetError::Generate(GenerateError::Failed { .. }),
                ..
            }) => {}
            other => panic!("Expected generator failure, got: {:?}", other),
        }
    }
}
