//! Value generators.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use cachet_core::CachetResult;

/// A freshly produced value.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated<T> {
    pub value: T,
    /// Ttl to store the value with. `None` or zero uses the policy's
    /// expiration rule.
    pub ttl: Option<Duration>,
}

impl<T> Generated<T> {
    pub fn new(value: T) -> Self {
        Self { value, ttl: None }
    }

    pub fn with_ttl(value: T, ttl: Duration) -> Self {
        Self {
            value,
            ttl: Some(ttl),
        }
    }
}

/// Produces values on cache miss or staleness.
///
/// Closures of the form `|id: String| async move { ... }` implement this
/// trait directly.
#[async_trait]
pub trait Generator<T>: Send + Sync + 'static {
    async fn generate(&self, id: &str) -> CachetResult<Generated<T>>;
}

#[async_trait]
impl<T, F, Fut> Generator<T> for F
where
    T: Send + 'static,
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CachetResult<Generated<T>>> + Send + 'static,
{
    async fn generate(&self, id: &str) -> CachetResult<Generated<T>> {
        (self)(id.to_string()).await
    }
}
