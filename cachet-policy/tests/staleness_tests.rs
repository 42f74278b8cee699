//! Stale serving tests.

use std::time::Duration;

use cachet_core::{GenerateTimeout, PolicyConfig, PolicyRules};
use cachet_policy::{Outcome, Policy};
use cachet_test_utils::assertions::assert_read;
use cachet_test_utils::{fixtures, init_tracing, ScriptedGenerator};
use futures_util::future::join_all;
use tokio::time::Instant;

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

fn stale_rules() -> PolicyConfig {
    PolicyConfig::new()
        .with_expires_in(ms(1000))
        .with_stale_in(ms(500))
        .with_stale_timeout(ms(50))
        .with_generate_timeout(GenerateTimeout::After(ms(200)))
}

async fn policy_with(
    rules: impl Into<PolicyRules>,
    generator: ScriptedGenerator<String>,
) -> Policy<String> {
    init_tracing();
    let clock = fixtures::clock();
    let (_, client) = fixtures::memory_client(clock.clone()).await;
    Policy::builder("items")
        .client(client)
        .generator(generator)
        .rules(rules)
        .clock(clock)
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_stale_value_served_after_stale_timeout() {
    let generator = ScriptedGenerator::versioned();
    let policy = policy_with(stale_rules(), generator.clone()).await;

    policy.get("x").await.unwrap();
    tokio::time::sleep(ms(600)).await;
    generator.set_delay(ms(100));

    let started = Instant::now();
    let read = policy.get("x").await;
    assert_eq!(started.elapsed(), ms(50));
    assert_read(&read, Outcome::StaleHit, Some(&"v1".to_string()));
    let read = read.unwrap();
    assert!(read.report.is_stale);
    assert_eq!(read.report.ttl, ms(400));
    assert!(policy.is_generating("x"));

    // Background generation finishes at +100ms and refreshes the cache.
    tokio::time::sleep(ms(60)).await;
    assert!(!policy.is_generating("x"));
    let read = policy.get("x").await;
    assert_read(&read, Outcome::Hit, Some(&"v2".to_string()));

    let stats = policy.stats();
    assert_eq!(stats.generates, 2);
    assert_eq!(stats.stales, 1);
    assert_eq!(stats.errors, 0);
}

#[tokio::test(start_paused = true)]
async fn test_fast_generation_beats_stale_timeout() {
    let generator = ScriptedGenerator::versioned();
    let policy = policy_with(stale_rules(), generator.clone()).await;

    policy.get("x").await.unwrap();
    tokio::time::sleep(ms(600)).await;
    generator.set_delay(ms(20));

    let started = Instant::now();
    let read = policy.get("x").await;
    assert_eq!(started.elapsed(), ms(20));
    assert_read(&read, Outcome::Generated, Some(&"v2".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_stale_and_fresh_callers_diverge() {
    let generator = ScriptedGenerator::versioned();
    let policy = policy_with(stale_rules(), generator.clone()).await;

    policy.get("x").await.unwrap();
    tokio::time::sleep(ms(600)).await;
    generator.set_delay(ms(100));

    // Early callers get the stale value; one arriving after the generation
    // completes sees the fresh one.
    let early = join_all((0..3).map(|_| policy.get("x"))).await;
    for read in &early {
        assert_read(read, Outcome::StaleHit, Some(&"v1".to_string()));
    }

    tokio::time::sleep(ms(60)).await;
    let late = policy.get("x").await;
    assert_read(&late, Outcome::Hit, Some(&"v2".to_string()));
    assert_eq!(generator.calls(), 2);
    assert_eq!(policy.stats().stales, 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_fallback_when_record_expires_first() {
    let generator = ScriptedGenerator::versioned();
    let policy = policy_with(stale_rules(), generator.clone()).await;

    policy.get("x").await.unwrap();
    // 40ms of ttl left, less than the 50ms stale timeout.
    tokio::time::sleep(ms(960)).await;
    generator.set_delay(ms(100));

    let started = Instant::now();
    let read = policy.get("x").await;
    assert_eq!(started.elapsed(), ms(100));
    assert_read(&read, Outcome::Generated, Some(&"v2".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_stale_without_stale_timeout_waits_for_generation() {
    let generator = ScriptedGenerator::versioned();
    let rules = PolicyConfig::new()
        .with_expires_in(ms(1000))
        .with_stale_in(ms(500))
        .with_generate_timeout(GenerateTimeout::After(ms(300)));
    let policy = policy_with(rules, generator.clone()).await;

    policy.get("x").await.unwrap();
    tokio::time::sleep(ms(600)).await;
    generator.set_delay(ms(250));

    let started = Instant::now();
    let read = policy.get("x").await;
    assert_eq!(started.elapsed(), ms(250));
    assert_read(&read, Outcome::Generated, Some(&"v2".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_stale_generator_failure_after_fallback() {
    let generator = ScriptedGenerator::versioned();
    let rules = stale_rules().with_drop_on_error(false);
    let policy = policy_with(rules, generator.clone()).await;

    policy.get("x").await.unwrap();
    tokio::time::sleep(ms(600)).await;
    generator.set_delay(ms(100));
    generator.set_failing(true);

    let read = policy.get("x").await;
    assert_read(&read, Outcome::StaleHit, Some(&"v1".to_string()));

    tokio::time::sleep(ms(60)).await;
    assert_eq!(policy.stats().errors, 1);
    assert_eq!(policy.pending_generations(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dynamic_stale_in() {
    let generator = ScriptedGenerator::versioned();
    // Stale 200ms after storage.
    let rules = PolicyRules::new(
        PolicyConfig::new()
            .with_expires_in(ms(1000))
            .with_generate_timeout(GenerateTimeout::After(ms(200))),
    )
    .with_stale_in_fn(|_, _| Duration::from_millis(200));
    let policy = policy_with(rules, generator.clone()).await;

    policy.get("x").await.unwrap();

    tokio::time::sleep(ms(199)).await;
    let read = policy.get("x").await;
    assert_read(&read, Outcome::Hit, Some(&"v1".to_string()));

    tokio::time::sleep(ms(1)).await;
    let read = policy.get("x").await;
    assert_read(&read, Outcome::Generated, Some(&"v2".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_stale_hit_without_generator() {
    init_tracing();
    let clock = fixtures::clock();
    let (_, client) = fixtures::memory_client(clock.clone()).await;
    let policy = Policy::<String>::builder("items")
        .client(client)
        .clock(clock)
        .rules(
            PolicyConfig::new()
                .with_expires_in(ms(1000))
                .with_stale_in(ms(500)),
        )
        .build()
        .unwrap();

    policy.set("x", &"manual".to_string(), Duration::ZERO).await.unwrap();
    tokio::time::sleep(ms(500)).await;

    let read = policy.get("x").await;
    assert_read(&read, Outcome::StaleHit, Some(&"manual".to_string()));
    assert!(read.unwrap().report.is_stale);
    assert_eq!(policy.stats().hits, 1);
    assert_eq!(policy.stats().stales, 0);
}
