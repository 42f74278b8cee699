//! Client facade tests against the memory engine.

use std::sync::Arc;
use std::time::Duration;

use cachet_core::{CacheKey, CachetError, Clock, StorageError, TokioClock};
use cachet_storage::{
    CacheEngine, Client, ClientOptions, EngineSource, MemoryEngine, MemoryEngineConfig,
};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    id: u64,
    name: String,
    tags: Vec<String>,
}

fn shared_engine(clock: Arc<dyn Clock>) -> Arc<MemoryEngine> {
    Arc::new(MemoryEngine::with_clock(MemoryEngineConfig::default(), clock))
}

fn client_for(engine: Arc<MemoryEngine>, partition: &str, clock: Arc<dyn Clock>) -> Client {
    Client::new(engine, ClientOptions::new().with_partition(partition))
        .unwrap()
        .with_clock(clock)
}

#[tokio::test]
async fn test_partitions_are_isolated() {
    let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
    let engine = shared_engine(clock.clone());
    let a = client_for(engine.clone(), "tenant-a", clock.clone());
    let b = client_for(engine.clone(), "tenant-b", clock);
    a.start().await.unwrap();

    let key = CacheKey::new("profiles", "1");
    let profile = Profile {
        id: 1,
        name: "ada".to_string(),
        tags: vec!["admin".to_string()],
    };

    a.set(&key, &profile, Duration::from_secs(10)).await.unwrap();
    assert_eq!(a.get::<Profile>(&key).await.unwrap().unwrap().item, profile);
    assert!(b.get::<Profile>(&key).await.unwrap().is_none());

    b.delete(&key).await.unwrap();
    assert!(a.get::<Profile>(&key).await.unwrap().is_some());
    assert_eq!(engine.stats().entry_count, 1);
}

#[tokio::test]
async fn test_segment_clear_through_engine() {
    let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
    let engine = shared_engine(clock.clone());
    let client = client_for(engine.clone(), "p", clock);
    client.start().await.unwrap();

    for id in 0..5 {
        let key = CacheKey::new("profiles", id.to_string());
        client.set(&key, &id, Duration::from_secs(10)).await.unwrap();
    }
    client
        .set(&CacheKey::new("sessions", "1"), &1, Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(engine.clear_segment("p", "profiles").unwrap(), 5);
    assert!(client
        .get::<u32>(&CacheKey::new("sessions", "1"))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_factory_engine_is_built_once() {
    let source = EngineSource::factory(|| {
        let engine: Arc<dyn CacheEngine> = Arc::new(MemoryEngine::default());
        Ok(engine)
    });
    let client = Client::new(source, ClientOptions::default()).unwrap();
    client.start().await.unwrap();
    assert!(client.is_ready());

    let key = CacheKey::new("s", "a");
    client.set(&key, &"value", Duration::from_secs(10)).await.unwrap();
    assert_eq!(
        client.get::<String>(&key).await.unwrap().unwrap().item,
        "value"
    );
}

#[tokio::test]
async fn test_failing_factory_fails_construction() {
    let source = EngineSource::factory(|| {
        Err(StorageError::Connection {
            reason: "refused".to_string(),
        }
        .into())
    });
    let err = Client::new(source, ClientOptions::default()).unwrap_err();
    assert!(matches!(err, CachetError::Storage(StorageError::Connection { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_full_engine_rejects_writes() {
    let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
    let engine = Arc::new(MemoryEngine::with_clock(
        MemoryEngineConfig::new().with_max_entries(1),
        clock.clone(),
    ));
    let client = client_for(engine, "p", clock);
    client.start().await.unwrap();

    client
        .set(&CacheKey::new("s", "a"), &1, Duration::from_millis(100))
        .await
        .unwrap();
    let err = client
        .set(&CacheKey::new("s", "b"), &2, Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, CachetError::Storage(StorageError::Write { .. })));

    tokio::time::advance(Duration::from_millis(100)).await;
    client
        .set(&CacheKey::new("s", "b"), &2, Duration::from_millis(100))
        .await
        .unwrap();
}

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn prop_remaining_ttl_never_negative(ttl_ms in 1u64..5_000, waited_ms in 0u64..10_000) {
        let remaining = paused_runtime().block_on(async move {
            let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
            let client = client_for(shared_engine(clock.clone()), "p", clock);
            client.start().await.unwrap();

            let key = CacheKey::new("s", "a");
            client.set(&key, &1u8, Duration::from_millis(ttl_ms)).await.unwrap();
            tokio::time::advance(Duration::from_millis(waited_ms)).await;
            client.get::<u8>(&key).await.unwrap().map(|record| record.ttl)
        });

        if waited_ms >= ttl_ms {
            prop_assert!(remaining.is_none());
        } else {
            prop_assert_eq!(remaining, Some(Duration::from_millis(ttl_ms - waited_ms)));
        }
    }
}
