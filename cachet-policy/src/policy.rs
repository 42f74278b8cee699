//! The policy engine.
//!
//! A [`Policy`] reads through a [`Client`], decides whether a cached record
//! can be served as-is, and otherwise runs the generator. Concurrent callers
//! for one id share a single generation through the
//! [`GenerationRegistry`]. Each caller then races three signals: the
//! generation result, the stale-serving timer and the generate timer.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use cachet_core::{
    system_clock, CacheKey, CachetResult, Clock, GenerateError, ItemId, PolicyRules, StoredRecord,
    Timestamp,
};
use cachet_storage::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::events::{EventBus, PolicyEvent};
use crate::generator::{Generated, Generator};
use crate::pending::{Admission, Fresh, GenerationOutcome, GenerationRegistry, GenerationTicket};
use crate::report::{GetFailure, GetReport, Outcome, PolicyRead};
use crate::stats::{PolicyStats, StatsSnapshot};

/// Values a policy can cache.
pub trait CacheValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Builder for [`Policy`].
pub struct PolicyBuilder<T> {
    segment: String,
    client: Option<Arc<Client>>,
    generator: Option<Arc<dyn Generator<T>>>,
    rules: PolicyRules,
    clock: Arc<dyn Clock>,
}

impl<T: CacheValue> PolicyBuilder<T> {
    /// Cache through `client`. Without one the policy runs in no-cache
    /// mode: every read misses and writes are skipped.
    pub fn client(mut self, client: Arc<Client>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn generator<G: Generator<T>>(mut self, generator: G) -> Self {
        self.generator = Some(Arc::new(generator));
        self
    }

    pub fn rules(mut self, rules: impl Into<PolicyRules>) -> Self {
        self.rules = rules.into();
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate the segment name and rules and build the policy.
    pub fn build(self) -> CachetResult<Policy<T>> {
        if let Some(client) = &self.client {
            client.validate_segment_name(&self.segment)?;
        }
        self.rules.validate(self.generator.is_some())?;

        Ok(Policy {
            inner: Arc::new(PolicyInner {
                segment: self.segment,
                client: self.client,
                generator: self.generator,
                rules: RwLock::new(Arc::new(self.rules)),
                clock: self.clock,
                registry: GenerationRegistry::new(),
                stats: PolicyStats::new(),
                events: EventBus::new(),
            }),
        })
    }
}

/// Cache-aside policy for one segment.
///
/// Cheap to clone; clones share rules, stats and in-flight generations.
pub struct Policy<T> {
    inner: Arc<PolicyInner<T>>,
}

struct PolicyInner<T> {
    segment: String,
    client: Option<Arc<Client>>,
    generator: Option<Arc<dyn Generator<T>>>,
    rules: RwLock<Arc<PolicyRules>>,
    clock: Arc<dyn Clock>,
    registry: GenerationRegistry<T>,
    stats: PolicyStats,
    events: EventBus,
}

impl<T> Clone for Policy<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Policy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("segment", &self.inner.segment)
            .field("cached", &self.inner.client.is_some())
            .field("generator", &self.inner.generator.is_some())
            .finish()
    }
}

impl<T: CacheValue> Policy<T> {
    pub fn builder(segment: impl Into<String>) -> PolicyBuilder<T> {
        PolicyBuilder {
            segment: segment.into(),
            client: None,
            generator: None,
            rules: PolicyRules::default(),
            clock: system_clock(),
        }
    }

    pub fn segment(&self) -> &str {
        &self.inner.segment
    }

    /// The active rule set.
    pub fn rules(&self) -> Arc<PolicyRules> {
        self.inner.rules()
    }

    /// Validate and atomically replace the rule set.
    ///
    /// Records already stored keep the ttl they were written with.
    pub fn set_rules(&self, rules: impl Into<PolicyRules>) -> CachetResult<()> {
        let rules = rules.into();
        rules.validate(self.inner.generator.is_some())?;
        *self
            .inner
            .rules
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(rules);
        info!(segment = %self.inner.segment, "policy rules updated");
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.inner
            .client
            .as_ref()
            .map(|client| client.is_ready())
            .unwrap_or(false)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Receive the failures this policy absorbs instead of returning.
    pub fn subscribe(&self) -> broadcast::Receiver<PolicyEvent> {
        self.inner.events.subscribe()
    }

    /// Number of ids with a generation in flight.
    pub fn pending_generations(&self) -> usize {
        self.inner.registry.in_flight()
    }

    pub fn is_generating(&self, id: impl Into<ItemId>) -> bool {
        self.inner.registry.is_pending(id.into().as_str())
    }

    /// Remaining ttl of an item stored at `stored` under the active rules.
    pub fn ttl(&self, stored: Timestamp) -> Duration {
        self.inner.rules().ttl(stored, self.inner.clock.now())
    }

    /// Store a value. A zero `ttl` uses the expiration rule; if that yields
    /// zero too the value is not cached.
    pub async fn set(&self, id: impl Into<ItemId>, value: &T, ttl: Duration) -> CachetResult<()> {
        let id = id.into();
        let ttl = if ttl.is_zero() {
            let now = self.inner.clock.now();
            self.inner.rules().ttl(now, now)
        } else {
            ttl
        };
        self.inner.store(&id, value, ttl).await
    }

    /// Remove a cached value. In-flight generations are not affected.
    pub async fn delete(&self, id: impl Into<ItemId>) -> CachetResult<()> {
        self.inner.remove(&id.into()).await
    }

    /// Read a value, generating it when missing or stale.
    pub async fn get(&self, id: impl Into<ItemId>) -> Result<PolicyRead<T>, GetFailure> {
        let id = id.into();
        let inner = &self.inner;
        let rules = inner.rules();
        inner.stats.record_get();

        let started = Instant::now();
        let read = inner.read(&id).await;
        let mut report = GetReport {
            msec: started.elapsed().as_secs_f64() * 1000.0,
            ..GetReport::default()
        };

        let cached = match read {
            Ok(cached) => cached,
            Err(error) => {
                inner.stats.record_error();
                inner.events.error(&inner.segment, id.as_str(), &error);
                if inner.generator.is_none() || !rules.generate_on_read_error() {
                    return Err(GetFailure::new(error, report));
                }
                warn!(
                    segment = %inner.segment,
                    id = %id,
                    error = %error,
                    "cache read failed, treating as miss"
                );
                report.error = Some(error);
                None
            }
        };

        if let Some(record) = &cached {
            inner.stats.record_hit();
            let is_stale = rules.is_stale(record.stored, record.ttl, inner.clock.now());
            report = report.with_record(record, is_stale);
        }

        let Some(generator) = inner.generator.clone() else {
            return Ok(PolicyRead::from_cache(cached, report));
        };
        if cached.is_some() && !report.is_stale {
            return Ok(PolicyRead::from_cache(cached, report));
        }

        let receiver = match inner.registry.admit(id.as_str(), rules.pending_generate_timeout()) {
            Admission::Attached(receiver) => {
                debug!(segment = %inner.segment, id = %id, "attached to pending generation");
                receiver
            }
            Admission::Started(receiver, ticket) => {
                inner.stats.record_generate();
                if report.is_stale {
                    inner.stats.record_stale();
                }
                self.spawn_generation(id.clone(), generator, rules.clone(), ticket);
                receiver
            }
            Admission::CoolingDown => {
                debug!(segment = %inner.segment, id = %id, "generation cooling down");
                return Ok(PolicyRead::from_cache(cached, report));
            }
        };

        self.wait(&id, receiver, cached, report, &rules).await
    }

    fn spawn_generation(
        &self,
        id: ItemId,
        generator: Arc<dyn Generator<T>>,
        rules: Arc<PolicyRules>,
        ticket: GenerationTicket<T>,
    ) {
        let inner = self.inner.clone();
        debug!(segment = %inner.segment, id = ticket.id(), "generation started");
        tokio::spawn(async move {
            let outcome = inner.generate(&id, generator.as_ref(), &rules).await;
            ticket.complete(outcome);
        });
    }

    async fn wait(
        &self,
        id: &ItemId,
        receiver: oneshot::Receiver<GenerationOutcome<T>>,
        cached: Option<StoredRecord<T>>,
        report: GetReport,
        rules: &PolicyRules,
    ) -> Result<PolicyRead<T>, GetFailure> {
        // Serving stale only makes sense if the record outlives the wait.
        let stale_wait = match (&cached, rules.stale_timeout()) {
            (Some(record), Some(timeout)) if record.ttl > timeout => Some(timeout),
            _ => None,
        };
        let generate_wait = rules.generate_timeout().and_then(|timeout| timeout.duration());

        tokio::select! {
            biased;

            received = receiver => resolve(id, received, report),

            _ = sleep_for(stale_wait) => {
                debug!(
                    segment = %self.inner.segment,
                    id = %id,
                    "serving stale value while generation continues"
                );
                Ok(PolicyRead::from_cache(cached, report))
            }

            _ = sleep_for(generate_wait) => {
                let timeout = generate_wait.unwrap_or_default();
                self.inner.stats.record_error();
                warn!(
                    segment = %self.inner.segment,
                    id = %id,
                    timeout_ms = timeout.as_millis() as u64,
                    "generation timed out"
                );
                let error = GenerateError::Timeout {
                    id: id.to_string(),
                    timeout,
                };
                Err(GetFailure::new(error.into(), report))
            }
        }
    }
}

fn resolve<T>(
    id: &ItemId,
    received: Result<GenerationOutcome<T>, oneshot::error::RecvError>,
    mut report: GetReport,
) -> Result<PolicyRead<T>, GetFailure> {
    let outcome = received.unwrap_or_else(|_| {
        Err(GenerateError::Abandoned {
            id: id.to_string(),
        }
        .into())
    });

    match outcome {
        Ok(fresh) => {
            report.stored = Some(fresh.stored);
            report.ttl = fresh.ttl;
            report.is_stale = false;
            if let Some(error) = fresh.write_error {
                report.error = Some(error);
            }
            Ok(PolicyRead {
                value: Some(fresh.value),
                outcome: Outcome::Generated,
                report,
            })
        }
        Err(error) => Err(GetFailure::new(error, report)),
    }
}

async fn sleep_for(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

impl<T: CacheValue> PolicyInner<T> {
    fn rules(&self) -> Arc<PolicyRules> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn key(&self, id: &ItemId) -> CacheKey {
        CacheKey::for_item(&self.segment, id)
    }

    async fn read(&self, id: &ItemId) -> CachetResult<Option<StoredRecord<T>>> {
        match &self.client {
            Some(client) => client.get(&self.key(id)).await,
            None => Ok(None),
        }
    }

    async fn store(&self, id: &ItemId, value: &T, ttl: Duration) -> CachetResult<()> {
        let Some(client) = &self.client else {
            return Ok(());
        };
        if ttl.is_zero() {
            return Ok(());
        }
        match client.set(&self.key(id), value, ttl).await {
            Ok(()) => {
                self.stats.record_set();
                Ok(())
            }
            Err(error) => {
                self.stats.record_error();
                Err(error)
            }
        }
    }

    async fn remove(&self, id: &ItemId) -> CachetResult<()> {
        let Some(client) = &self.client else {
            return Ok(());
        };
        client.delete(&self.key(id)).await.inspect_err(|_| {
            self.stats.record_error();
        })
    }

    async fn generate(
        &self,
        id: &ItemId,
        generator: &dyn Generator<T>,
        rules: &PolicyRules,
    ) -> GenerationOutcome<T> {
        debug!(segment = %self.segment, id = %id, "generating value");

        match generator.generate(id.as_str()).await {
            Ok(Generated { value, ttl }) => {
                let now = self.clock.now();
                let ttl = match ttl {
                    Some(ttl) if !ttl.is_zero() => ttl,
                    _ => rules.ttl(now, now),
                };

                let mut write_error = None;
                if let Err(error) = self.store(id, &value, ttl).await {
                    warn!(
                        segment = %self.segment,
                        id = %id,
                        error = %error,
                        "failed to store generated value"
                    );
                    self.events.error(&self.segment, id.as_str(), &error);
                    if !rules.generate_ignore_write_error() {
                        write_error = Some(error);
                    }
                }

                Ok(Fresh {
                    value,
                    stored: now,
                    ttl,
                    write_error,
                })
            }
            Err(error) => {
                self.stats.record_error();
                warn!(segment = %self.segment, id = %id, error = %error, "generator failed");
                self.events.error(&self.segment, id.as_str(), &error);

                if rules.drop_on_error() {
                    if let Err(delete_error) = self.remove(id).await {
                        warn!(
                            segment = %self.segment,
                            id = %id,
                            error = %delete_error,
                            "failed to drop item after generator error"
                        );
                        self.events.error(&self.segment, id.as_str(), &delete_error);
                    }
                }
                Err(error)
            }
        }
    }
}
