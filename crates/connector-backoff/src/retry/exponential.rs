//! Exponential backoff with jitter.

use crate::config::{RetryPolicy, RetrySettings};
use crate::error::{ConfigError, RateLimitError, RetriesExhausted};
use crate::throttle::LogThrottle;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff for rate-limited operations.
///
/// Each rate-limited attempt grows the delay multiplicatively before waiting:
///
/// ```text
/// jitter_factor = random [0, 1) if jitter else 0
/// delay = delay * exponential_base * (1 + jitter_factor)
/// ```
///
/// starting from `initial_delay`, so the first wait is already
/// `initial_delay * exponential_base`. Only errors whose
/// [`RateLimitError::is_rate_limit`] returns `true` are retried; anything else
/// is returned on the spot.
///
/// # Examples
///
/// ```rust
/// use connector_backoff::error::ConnectorError;
/// use connector_backoff::retry::ExponentialBackoff;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), ConnectorError> {
/// let backoff = ExponentialBackoff::builder()
///     .max_retries(5)
///     .initial_delay(Duration::from_millis(500))
///     .jitter(false)
///     .build();
///
/// let _reply = backoff
///     .execute(|| async { Ok::<_, ConnectorError>("hello") })
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    policy: RetryPolicy,
    throttle: Arc<LogThrottle>,
}

impl ExponentialBackoff {
    /// Create a backoff from a policy, logging through the shared throttle.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            throttle: LogThrottle::global(),
        }
    }

    /// Create a backoff from settings read off a receiver.
    pub fn from_settings<S: RetrySettings + ?Sized>(settings: &S) -> Self {
        Self::new(settings.retry_policy())
    }

    /// Create a new builder for configuring exponential backoff.
    pub fn builder() -> ExponentialBackoffBuilder {
        ExponentialBackoffBuilder::default()
    }

    /// The policy this backoff runs with.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Maximum number of attempts, including the first.
    pub fn max_retries(&self) -> u32 {
        self.policy.max_retries
    }

    /// Compute the delay that follows `previous`.
    ///
    /// Without jitter this is exactly `previous * exponential_base`. With
    /// jitter the result is that value times a factor in `[1, 2)`. Results too
    /// large for a `Duration` saturate at `Duration::MAX`.
    pub fn next_delay(&self, previous: Duration) -> Duration {
        let jitter_factor = if self.policy.jitter {
            rand::random::<f64>()
        } else {
            0.0
        };
        let secs = previous.as_secs_f64() * self.policy.exponential_base * (1.0 + jitter_factor);

        Duration::try_from_secs_f64(secs).unwrap_or(if secs > 0.0 {
            Duration::MAX
        } else {
            Duration::ZERO
        })
    }

    /// Run an operation, retrying it while it reports a rate limit.
    ///
    /// The operation is attempted up to `max_retries` times. Between attempts
    /// the task sleeps on the tokio timer, so other tasks keep running. When
    /// every attempt is rate limited the result is
    /// [`RateLimitError::from_exhausted`] chained to the last failure; any
    /// other error is returned unchanged without waiting.
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RateLimitError,
    {
        let max_retries = self.policy.max_retries;
        let mut delay = self.policy.initial_delay;
        let mut last_error = None;

        for attempt in 1..=max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) if !err.is_rate_limit() => return Err(err),
                Err(err) => {
                    if attempt < max_retries {
                        delay = self.next_delay(delay);
                        self.log_retry(attempt, delay);
                        tokio::time::sleep(delay).await;
                    } else {
                        self.log_exhausted(attempt);
                    }
                    last_error = Some(err);
                }
            }
        }

        Err(E::from_exhausted(RetriesExhausted::new(
            max_retries,
            max_retries,
            last_error,
        )))
    }

    fn log_retry(&self, attempt: u32, delay: Duration) {
        if let Some(suppressed) = self.throttle.check() {
            let delay_secs = delay.as_secs_f64();
            warn!(
                attempt,
                max_retries = self.policy.max_retries,
                delay_secs,
                suppressed,
                "Rate limit exceeded: Retrying after model I/O error ({}/{}). Wait for {:.2} seconds.",
                attempt,
                self.policy.max_retries,
                delay_secs
            );
        }
    }

    fn log_exhausted(&self, attempt: u32) {
        if let Some(suppressed) = self.throttle.check() {
            warn!(
                attempt,
                max_retries = self.policy.max_retries,
                suppressed,
                "Rate limit exceeded: Giving up after model I/O error ({}/{}).",
                attempt,
                self.policy.max_retries
            );
        }
    }
}

impl Default for ExponentialBackoff {
    /// Backoff with the default [`RetryPolicy`]: 10 attempts, 1s initial delay,
    /// base 2.0, jitter on.
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl From<RetryPolicy> for ExponentialBackoff {
    fn from(policy: RetryPolicy) -> Self {
        Self::new(policy)
    }
}

/// Builder for configuring `ExponentialBackoff`.
///
/// Unset parameters fall back to the [`RetryPolicy`] defaults.
///
/// # Examples
///
/// ```rust
/// use connector_backoff::retry::ExponentialBackoff;
/// use std::time::Duration;
///
/// let backoff = ExponentialBackoff::builder()
///     .max_retries(3)
///     .initial_delay(Duration::from_secs(1))
///     .exponential_base(2.0)
///     .jitter(false)
///     .try_build()
///     .unwrap();
/// assert_eq!(backoff.max_retries(), 3);
/// ```
#[derive(Debug, Default)]
pub struct ExponentialBackoffBuilder {
    max_retries: Option<u32>,
    initial_delay: Option<Duration>,
    exponential_base: Option<f64>,
    jitter: Option<bool>,
    throttle: Option<Arc<LogThrottle>>,
}

impl ExponentialBackoffBuilder {
    /// Set the maximum number of attempts, including the first.
    ///
    /// Default: 10
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set the delay the backoff grows from.
    ///
    /// Default: 1s
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set the multiplier applied after each rate-limited attempt.
    ///
    /// Default: 2.0
    pub fn exponential_base(mut self, base: f64) -> Self {
        self.exponential_base = Some(base);
        self
    }

    /// Enable or disable randomized delay growth.
    ///
    /// Default: true
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Start from an existing policy.
    pub fn policy(self, policy: RetryPolicy) -> Self {
        self.max_retries(policy.max_retries)
            .initial_delay(policy.initial_delay)
            .exponential_base(policy.exponential_base)
            .jitter(policy.jitter)
    }

    /// Route retry warnings through a dedicated throttle instead of the
    /// shared one.
    pub fn log_throttle(mut self, throttle: Arc<LogThrottle>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Build the `ExponentialBackoff` instance without validating it.
    pub fn build(self) -> ExponentialBackoff {
        let defaults = RetryPolicy::default();
        ExponentialBackoff {
            policy: RetryPolicy {
                max_retries: self.max_retries.unwrap_or(defaults.max_retries),
                initial_delay: self.initial_delay.unwrap_or(defaults.initial_delay),
                exponential_base: self.exponential_base.unwrap_or(defaults.exponential_base),
                jitter: self.jitter.unwrap_or(defaults.jitter),
            },
            throttle: self.throttle.unwrap_or_else(LogThrottle::global),
        }
    }

    /// Build the `ExponentialBackoff` instance, rejecting unusable policies.
    pub fn try_build(self) -> Result<ExponentialBackoff, ConfigError> {
        let backoff = self.build();
        backoff.policy.validate()?;
        Ok(backoff)
    }
}
