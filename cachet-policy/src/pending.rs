//! In-flight generation registry.
//!
//! One entry per id with a generation running. Callers arriving while an
//! entry exists attach a oneshot receiver to it instead of invoking the
//! generator again. The entry is removed, and every receiver resolved, by
//! the [`GenerationTicket`] owned by the generation task.
//!
//! Cool-down markers are kept in a separate map so they outlive the entry
//! they were created with.

use std::sync::Arc;
use std::time::Duration;

use cachet_core::{CachetError, GenerateError, Timestamp};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

/// A successfully generated value, as delivered to waiters.
#[derive(Debug, Clone)]
pub(crate) struct Fresh<T> {
    pub value: T,
    pub stored: Timestamp,
    pub ttl: Duration,
    /// Store failure surfaced alongside the value.
    pub write_error: Option<CachetError>,
}

pub(crate) type GenerationOutcome<T> = Result<Fresh<T>, CachetError>;

struct GenerationState<T> {
    started_at: Instant,
    waiters: Vec<oneshot::Sender<GenerationOutcome<T>>>,
}

pub(crate) enum Admission<T: Clone> {
    /// A generation was already running; wait on it.
    Attached(oneshot::Receiver<GenerationOutcome<T>>),
    /// The caller must run the generation and complete the ticket.
    Started(oneshot::Receiver<GenerationOutcome<T>>, GenerationTicket<T>),
    /// A generation started too recently; do not start another.
    CoolingDown,
}

type InFlight<T> = Arc<DashMap<String, GenerationState<T>>>;

pub(crate) struct GenerationRegistry<T> {
    in_flight: InFlight<T>,
    cooldowns: Arc<DashMap<String, Instant>>,
}

impl<T: Clone + Send + 'static> GenerationRegistry<T> {
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
            cooldowns: Arc::new(DashMap::new()),
        }
    }

    /// Attach to the running generation for `id`, or start a new one.
    ///
    /// With a nonzero `cooldown`, a new generation is refused until that
    /// long after the previous one for the same id started.
    pub fn admit(&self, id: &str, cooldown: Duration) -> Admission<T> {
        let (tx, rx) = oneshot::channel();
        match self.in_flight.entry(id.to_string()) {
            Entry::Occupied(mut occupied) => {
                // Callers that fell back to stale or timed out dropped their
                // receiver; a hung generation must not accumulate them.
                let waiters = &mut occupied.get_mut().waiters;
                waiters.retain(|waiter| !waiter.is_closed());
                waiters.push(tx);
                Admission::Attached(rx)
            }
            Entry::Vacant(vacant) => {
                let now = Instant::now();
                if self.cooling_down(id, now) {
                    return Admission::CoolingDown;
                }
                vacant.insert(GenerationState {
                    started_at: now,
                    waiters: vec![tx],
                });
                if !cooldown.is_zero() {
                    self.mark_cooldown(id, now + cooldown);
                }
                Admission::Started(
                    rx,
                    GenerationTicket {
                        id: id.to_string(),
                        in_flight: self.in_flight.clone(),
                        completed: false,
                    },
                )
            }
        }
    }

    fn cooling_down(&self, id: &str, now: Instant) -> bool {
        match self.cooldowns.get(id) {
            Some(until) => now < *until,
            None => false,
        }
    }

    fn mark_cooldown(&self, id: &str, until: Instant) {
        self.cooldowns.insert(id.to_string(), until);

        let cooldowns = self.cooldowns.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep_until(until).await;
            cooldowns.remove_if(&id, |_, marked| *marked <= until);
        });
    }

    /// Number of ids with a generation in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.in_flight.contains_key(id)
    }
}

/// Ownership of one in-flight generation.
///
/// Completing the ticket removes the registry entry and resolves every
/// waiter. A ticket dropped without completing (the generation task
/// panicked or was cancelled) resolves waiters with
/// [`GenerateError::Abandoned`].
pub(crate) struct GenerationTicket<T: Clone> {
    id: String,
    in_flight: InFlight<T>,
    completed: bool,
}

impl<T: Clone> GenerationTicket<T> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn complete(mut self, outcome: GenerationOutcome<T>) {
        self.completed = true;
        self.resolve(outcome);
    }

    fn resolve(&self, outcome: GenerationOutcome<T>) {
        let Some((_, state)) = self.in_flight.remove(&self.id) else {
            return;
        };
        debug!(
            id = %self.id,
            waiters = state.waiters.len(),
            elapsed_ms = state.started_at.elapsed().as_millis() as u64,
            "generation resolved"
        );
        // Waiters that gave up (stale fallback or timeout) have dropped their
        // receiver; sending to them fails harmlessly.
        for waiter in state.waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}

impl<T: Clone> Drop for GenerationTicket<T> {
    fn drop(&mut self) {
        if !self.completed {
            self.resolve(Err(GenerateError::Abandoned {
                id: self.id.clone(),
            }
            .into()));
        }
    }
}
