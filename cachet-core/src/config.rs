//! Policy configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{CachetError, CachetResult, ValidationError};
use crate::expiration::{DailyCutoff, ExpirationRule, StalenessRule};
use crate::Timestamp;

/// Upper bound for a static `stale_in` under a daily cutoff.
const ONE_DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// How long a caller may wait for a generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "GenerateTimeoutRepr", into = "GenerateTimeoutRepr")]
pub enum GenerateTimeout {
    /// Callers wait as long as the generator takes, possibly forever.
    Disabled,
    After(Duration),
}

impl GenerateTimeout {
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Disabled => None,
            Self::After(timeout) => Some(*timeout),
        }
    }
}

/// Serialized form: milliseconds, or `false` for disabled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
enum GenerateTimeoutRepr {
    Flag(bool),
    Millis(u64),
}

impl TryFrom<GenerateTimeoutRepr> for GenerateTimeout {
    type Error = ValidationError;

    fn try_from(repr: GenerateTimeoutRepr) -> Result<Self, Self::Error> {
        match repr {
            GenerateTimeoutRepr::Flag(false) => Ok(Self::Disabled),
            GenerateTimeoutRepr::Flag(true) => Err(ValidationError::InvalidValue {
                field: "generate_timeout".to_string(),
                value: "true".to_string(),
                reason: "use a duration in milliseconds or false".to_string(),
            }),
            GenerateTimeoutRepr::Millis(ms) => Ok(Self::After(Duration::from_millis(ms))),
        }
    }
}

impl From<GenerateTimeout> for GenerateTimeoutRepr {
    fn from(timeout: GenerateTimeout) -> Self {
        match timeout {
            GenerateTimeout::Disabled => Self::Flag(false),
            GenerateTimeout::After(d) => Self::Millis(d.as_millis() as u64),
        }
    }
}

/// Millisecond (de)serialization for durations.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
        }
    }
}

/// Declarative policy configuration.
///
/// This is the serializable half of [`PolicyRules`]; durations are written
/// in milliseconds. Use [`PolicyRules::validate`] (or build a policy) to
/// check it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    /// Relative lifetime from storage time.
    #[serde(with = "millis::option", skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<Duration>,
    /// Daily local cutoff, `HH:MM`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DailyCutoff>,
    /// Offset from storage time after which an item is stale.
    #[serde(with = "millis::option", skip_serializing_if = "Option::is_none")]
    pub stale_in: Option<Duration>,
    /// How long a caller holding a stale item waits before it is served.
    #[serde(with = "millis::option", skip_serializing_if = "Option::is_none")]
    pub stale_timeout: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generate_timeout: Option<GenerateTimeout>,
    /// Drop the cached item when the generator fails.
    pub drop_on_error: bool,
    /// Treat a cache read failure as a miss and generate.
    pub generate_on_read_error: bool,
    /// Hide write failures after a successful generation.
    pub generate_ignore_write_error: bool,
    /// Minimum spacing between generation starts for one id. Zero disables.
    #[serde(with = "millis")]
    pub pending_generate_timeout: Duration,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            expires_in: None,
            expires_at: None,
            stale_in: None,
            stale_timeout: None,
            generate_timeout: None,
            drop_on_error: true,
            generate_on_read_error: true,
            generate_ignore_write_error: true,
            pending_generate_timeout: Duration::ZERO,
        }
    }
}

impl PolicyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML.
    pub fn from_toml_str(input: &str) -> CachetResult<Self> {
        toml::from_str(input).map_err(|e| {
            CachetError::Validation(ValidationError::InvalidValue {
                field: "toml".to_string(),
                value: input.lines().next().unwrap_or_default().to_string(),
                reason: e.message().to_string(),
            })
        })
    }

    pub fn with_expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = Some(expires_in);
        self
    }

    pub fn with_expires_at(mut self, cutoff: DailyCutoff) -> Self {
        self.expires_at = Some(cutoff);
        self
    }

    pub fn with_stale_in(mut self, stale_in: Duration) -> Self {
        self.stale_in = Some(stale_in);
        self
    }

    pub fn with_stale_timeout(mut self, stale_timeout: Duration) -> Self {
        self.stale_timeout = Some(stale_timeout);
        self
    }

    pub fn with_generate_timeout(mut self, timeout: GenerateTimeout) -> Self {
        self.generate_timeout = Some(timeout);
        self
    }

    pub fn with_drop_on_error(mut self, enabled: bool) -> Self {
        self.drop_on_error = enabled;
        self
    }

    pub fn with_generate_on_read_error(mut self, enabled: bool) -> Self {
        self.generate_on_read_error = enabled;
        self
    }

    pub fn with_generate_ignore_write_error(mut self, enabled: bool) -> Self {
        self.generate_ignore_write_error = enabled;
        self
    }

    pub fn with_pending_generate_timeout(mut self, timeout: Duration) -> Self {
        self.pending_generate_timeout = timeout;
        self
    }
}

/// The active rule set of a policy.
///
/// Wraps a [`PolicyConfig`] and optionally replaces its static `stale_in`
/// with a function of `(stored, remaining_ttl)`. Rules are immutable; a
/// policy swaps the whole set on update.
#[derive(Debug, Clone, Default)]
pub struct PolicyRules {
    config: PolicyConfig,
    stale_in_fn: Option<StalenessRule>,
}

impl PolicyRules {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            stale_in_fn: None,
        }
    }

    /// Compute `stale_in` per item instead of using a fixed offset.
    pub fn with_stale_in_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(Timestamp, Duration) -> Duration + Send + Sync + 'static,
    {
        self.stale_in_fn = Some(StalenessRule::dynamic(f));
        self
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn expiration(&self) -> Option<ExpirationRule> {
        match (self.config.expires_in, self.config.expires_at) {
            (Some(expires_in), _) => Some(ExpirationRule::ExpiresIn(expires_in)),
            (None, Some(cutoff)) => Some(ExpirationRule::ExpiresAt(cutoff)),
            (None, None) => None,
        }
    }

    pub fn staleness(&self) -> Option<StalenessRule> {
        match &self.stale_in_fn {
            Some(rule) => Some(rule.clone()),
            None => self.config.stale_in.map(StalenessRule::Fixed),
        }
    }

    /// Ttl granted to an item stored at `stored`, evaluated at `now`.
    ///
    /// Zero when no expiration rule is configured, meaning "do not cache".
    pub fn ttl(&self, stored: Timestamp, now: Timestamp) -> Duration {
        self.expiration()
            .map(|rule| rule.ttl(stored, now))
            .unwrap_or(Duration::ZERO)
    }

    /// Whether an item stored at `stored` with `remaining` ttl is stale at `now`.
    pub fn is_stale(&self, stored: Timestamp, remaining: Duration, now: Timestamp) -> bool {
        self.staleness()
            .map(|rule| rule.is_stale(stored, remaining, now))
            .unwrap_or(false)
    }

    pub fn stale_timeout(&self) -> Option<Duration> {
        self.config.stale_timeout
    }

    pub fn generate_timeout(&self) -> Option<GenerateTimeout> {
        self.config.generate_timeout
    }

    pub fn drop_on_error(&self) -> bool {
        self.config.drop_on_error
    }

    pub fn generate_on_read_error(&self) -> bool {
        self.config.generate_on_read_error
    }

    pub fn generate_ignore_write_error(&self) -> bool {
        self.config.generate_ignore_write_error
    }

    pub fn pending_generate_timeout(&self) -> Duration {
        self.config.pending_generate_timeout
    }

    /// Validate the rule set.
    ///
    /// `has_generator` tells whether the owning policy generates values;
    /// a generator makes `generate_timeout` mandatory.
    pub fn validate(&self, has_generator: bool) -> CachetResult<()> {
        let config = &self.config;

        if config.expires_in.is_some() && config.expires_at.is_some() {
            return Err(ValidationError::IncompatibleOptions {
                option_a: "expires_in".to_string(),
                option_b: "expires_at".to_string(),
            }
            .into());
        }

        let has_stale_in = config.stale_in.is_some() || self.stale_in_fn.is_some();

        if has_stale_in && self.expiration().is_none() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "expires_in or expires_at (required by stale_in)".to_string(),
            }
            .into());
        }

        if let Some(stale_in) = self.staleness().and_then(|rule| rule.fixed()) {
            let limit = match self.expiration() {
                Some(ExpirationRule::ExpiresIn(expires_in)) => expires_in,
                _ => ONE_DAY,
            };
            if stale_in >= limit {
                return Err(invalid_duration(
                    "stale_in",
                    stale_in,
                    "stale_in must be less than the expiration window",
                ));
            }
        }

        if let Some(stale_timeout) = config.stale_timeout {
            if !has_stale_in {
                return Err(ValidationError::RequiredFieldMissing {
                    field: "stale_in (required by stale_timeout)".to_string(),
                }
                .into());
            }
            if let Some(expires_in) = config.expires_in {
                if stale_timeout >= expires_in {
                    return Err(invalid_duration(
                        "stale_timeout",
                        stale_timeout,
                        "stale_timeout must be less than expires_in",
                    ));
                }
            }
            if let Some(GenerateTimeout::After(generate_timeout)) = config.generate_timeout {
                if stale_timeout >= generate_timeout {
                    return Err(invalid_duration(
                        "stale_timeout",
                        stale_timeout,
                        "stale_timeout must be less than generate_timeout",
                    ));
                }
            }
        }

        if has_generator && config.generate_timeout.is_none() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "generate_timeout".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

impl From<PolicyConfig> for PolicyRules {
    fn from(config: PolicyConfig) -> Self {
        Self::new(config)
    }
}

fn invalid_duration(field: &str, value: Duration, reason: &str) -> CachetError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        value: format!("{:?}", value),
        reason: reason.to_string(),
    }
    .into()
}

// =============================================================================
// TESTS
// =============================================================================
