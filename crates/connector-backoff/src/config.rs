//! Retry policy configuration
//!
//! A [`RetryPolicy`] holds the four values the backoff loop reads on every
//! call. Connectors usually embed one and expose it through
//! [`RetrySettings`], which is what [`retry_with_exponential_backoff`] reads
//! from the receiver at call time.
//!
//! [`retry_with_exponential_backoff`]: crate::retry::retry_with_exponential_backoff

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of attempts, including the first one.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Default delay the backoff grows from.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Default multiplier applied to the delay after each rate-limited attempt.
pub const DEFAULT_EXPONENTIAL_BASE: f64 = 2.0;

/// Backoff parameters for rate-limited calls.
///
/// On the wire `initial_delay` is a float number of seconds, and every field
/// is optional:
///
/// ```
/// use connector_backoff::config::RetryPolicy;
/// use std::time::Duration;
///
/// let policy: RetryPolicy = toml::from_str("max_retries = 3\ninitial_delay = 0.5").unwrap();
/// assert_eq!(policy.max_retries, 3);
/// assert_eq!(policy.initial_delay, Duration::from_millis(500));
/// assert!(policy.jitter);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_retries: u32,

    /// Delay the backoff grows from
    #[serde(with = "seconds")]
    pub initial_delay: Duration,

    /// Multiplier applied to the delay after each rate-limited attempt
    pub exponential_base: f64,

    /// Randomize growth by a factor in `[1, 2)`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
            exponential_base: DEFAULT_EXPONENTIAL_BASE,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Check that the policy describes a usable backoff.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::InvalidField {
                field: "max_retries",
                reason: "must allow at least one attempt".to_string(),
            });
        }
        if self.initial_delay.is_zero() {
            return Err(ConfigError::InvalidField {
                field: "initial_delay",
                reason: "must be positive".to_string(),
            });
        }
        if !self.exponential_base.is_finite() || self.exponential_base <= 1.0 {
            return Err(ConfigError::InvalidField {
                field: "exponential_base",
                reason: format!("must be a finite number above 1, got {}", self.exponential_base),
            });
        }
        Ok(())
    }

    /// Load a policy from environment variables.
    ///
    /// Values from a `.env` file are picked up as well. This will look for:
    /// - `CONNECTOR_BACKOFF_MAX_RETRIES` for the attempt budget
    /// - `CONNECTOR_BACKOFF_INITIAL_DELAY` for the initial delay (in seconds)
    /// - `CONNECTOR_BACKOFF_EXPONENTIAL_BASE` for the growth multiplier
    /// - `CONNECTOR_BACKOFF_JITTER` for jitter (`true`/`false`/`1`/`0`)
    ///
    /// Unset variables keep their defaults; the result is validated.
    #[cfg(feature = "env")]
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    #[cfg_attr(not(feature = "env"), allow(dead_code))]
    fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self, ConfigError> {
        fn invalid(var: &'static str, value: String) -> ConfigError {
            ConfigError::InvalidEnv { var, value }
        }

        let mut policy = Self::default();

        if let Some(value) = lookup("CONNECTOR_BACKOFF_MAX_RETRIES") {
            policy.max_retries = value
                .trim()
                .parse()
                .map_err(|_| invalid("CONNECTOR_BACKOFF_MAX_RETRIES", value))?;
        }

        if let Some(value) = lookup("CONNECTOR_BACKOFF_INITIAL_DELAY") {
            policy.initial_delay = value
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .ok_or_else(|| invalid("CONNECTOR_BACKOFF_INITIAL_DELAY", value))?;
        }

        if let Some(value) = lookup("CONNECTOR_BACKOFF_EXPONENTIAL_BASE") {
            policy.exponential_base = value
                .trim()
                .parse()
                .map_err(|_| invalid("CONNECTOR_BACKOFF_EXPONENTIAL_BASE", value))?;
        }

        if let Some(value) = lookup("CONNECTOR_BACKOFF_JITTER") {
            policy.jitter = match value.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" => false,
                _ => return Err(invalid("CONNECTOR_BACKOFF_JITTER", value)),
            };
        }

        policy.validate()?;
        Ok(policy)
    }
}

/// Retry settings exposed by a receiver.
///
/// [`retry_with_exponential_backoff`] reads these on every call rather than
/// when the operation is wrapped, so each receiver can carry its own policy
/// and change it at runtime.
///
/// [`retry_with_exponential_backoff`]: crate::retry::retry_with_exponential_backoff
pub trait RetrySettings {
    /// Delay the backoff grows from.
    fn initial_delay(&self) -> Duration;

    /// Maximum number of attempts, including the first.
    fn max_retries(&self) -> u32;

    /// Multiplier applied after each rate-limited attempt.
    fn exponential_base(&self) -> f64;

    /// Whether delay growth is randomized.
    fn jitter(&self) -> bool;

    /// Snapshot the settings as a policy.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries(),
            initial_delay: self.initial_delay(),
            exponential_base: self.exponential_base(),
            jitter: self.jitter(),
        }
    }
}

impl RetrySettings for RetryPolicy {
    fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn exponential_base(&self) -> f64 {
        self.exponential_base
    }

    fn jitter(&self) -> bool {
        self.jitter
    }

    fn retry_policy(&self) -> RetryPolicy {
        *self
    }
}

mod seconds {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
