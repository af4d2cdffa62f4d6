//! Error types for rate-limited connector calls
//!
//! The retrier only needs two things from an error type: a way to tell a
//! rate-limit failure apart from everything else, and a way to build the
//! error reported once the retry budget is spent. Both live on
//! [`RateLimitError`], so a wrapped operation keeps the error type of the
//! operation it wraps.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for connector calls.
pub type Result<T> = std::result::Result<T, ConnectorError>;

/// An error that may signal a recoverable rate-limit condition.
///
/// # Examples
///
/// ```
/// use connector_backoff::error::{RateLimitError, RetriesExhausted};
///
/// #[derive(Debug, thiserror::Error)]
/// enum ModelError {
///     #[error("too many requests")]
///     TooManyRequests,
///     #[error("invalid prompt")]
///     InvalidPrompt,
///     #[error(transparent)]
///     Exhausted(#[from] RetriesExhausted<ModelError>),
/// }
///
/// impl RateLimitError for ModelError {
///     fn is_rate_limit(&self) -> bool {
///         matches!(self, ModelError::TooManyRequests)
///     }
///
///     fn from_exhausted(exhausted: RetriesExhausted<Self>) -> Self {
///         ModelError::Exhausted(exhausted)
///     }
/// }
///
/// assert!(ModelError::TooManyRequests.is_rate_limit());
/// assert!(!ModelError::InvalidPrompt.is_rate_limit());
/// ```
pub trait RateLimitError: StdError + Send + Sync + Sized + 'static {
    /// Whether this failure is a transient rate limit that may be retried.
    fn is_rate_limit(&self) -> bool;

    /// Build the error returned once every attempt hit a rate limit.
    fn from_exhausted(exhausted: RetriesExhausted<Self>) -> Self;
}

/// The retry budget was consumed without a successful attempt.
///
/// The last rate-limit failure, if any was observed, is available through
/// [`StdError::source`] and [`RetriesExhausted::last_error`]. A budget of zero
/// attempts never calls the operation, so it carries no cause.
pub struct RetriesExhausted<E> {
    attempts: u32,
    max_retries: u32,
    last: Option<Box<E>>,
}

impl<E> RetriesExhausted<E> {
    /// Create a new exhaustion error.
    pub fn new(attempts: u32, max_retries: u32, last: Option<E>) -> Self {
        Self {
            attempts,
            max_retries,
            last: last.map(Box::new),
        }
    }

    /// Number of attempts that were made.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The configured attempt budget.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// The rate-limit failure from the final attempt.
    pub fn last_error(&self) -> Option<&E> {
        self.last.as_deref()
    }

    /// Consume the error, returning the final rate-limit failure.
    pub fn into_last_error(self) -> Option<E> {
        self.last.map(|last| *last)
    }
}

impl<E: fmt::Debug> fmt::Debug for RetriesExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetriesExhausted")
            .field("attempts", &self.attempts)
            .field("max_retries", &self.max_retries)
            .field("last", &self.last)
            .finish()
    }
}

impl<E> fmt::Display for RetriesExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rate limit error after max retries ({}/{} attempts)",
            self.attempts, self.max_retries
        )
    }
}

impl<E: StdError + 'static> StdError for RetriesExhausted<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.last.as_deref().map(|last| last as &(dyn StdError + 'static))
    }
}

/// Errors returned by connector calls.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The remote API reported a rate limit (429).
    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        /// Message from the API
        message: String,
        /// Time to wait before retrying, if provided by the API
        retry_after: Option<Duration>,
    },

    /// Every attempt was rate limited.
    #[error(transparent)]
    RetriesExhausted(#[from] RetriesExhausted<ConnectorError>),

    /// Authentication failed (401/403).
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The request was rejected as invalid (400/422).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Server side failure (500+).
    #[error("Internal server error: {0}")]
    InternalServerError(String),

    /// Generic API error for status codes not covered above.
    #[error("API error (status {status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message
        message: String,
    },

    /// Network or connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Other errors not covered by specific variants.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ConnectorError {
    /// Create a rate-limit error.
    pub fn rate_limit(message: impl Into<String>) -> Self {
        ConnectorError::RateLimit {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Create an error from an HTTP status code and response body.
    pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        match status {
            429 => ConnectorError::RateLimit {
                message: body.to_string(),
                retry_after,
            },
            400 | 422 => ConnectorError::InvalidRequest(body.to_string()),
            401 | 403 => ConnectorError::Authentication(body.to_string()),
            s if s >= 500 => ConnectorError::InternalServerError(body.to_string()),
            _ => ConnectorError::Api {
                status,
                message: body.to_string(),
            },
        }
    }

    /// Check if this error is transient and the request may succeed later.
    ///
    /// Broader than [`RateLimitError::is_rate_limit`]: server and connection
    /// failures count as well. The backoff itself only retries rate limits.
    pub fn is_retryable(&self) -> bool {
        match self {
            ConnectorError::RateLimit { .. } => true,
            ConnectorError::InternalServerError(_) => true,
            ConnectorError::Connection(_) => true,
            ConnectorError::Api { status, .. } => *status == 408 || *status == 409,
            _ => false,
        }
    }

    /// Time to wait before retrying, if the API provided one.
    pub fn retry_after(&self) -> Option<Duration> {
        if let ConnectorError::RateLimit { retry_after, .. } = self {
            *retry_after
        } else {
            None
        }
    }
}

impl RateLimitError for ConnectorError {
    fn is_rate_limit(&self) -> bool {
        matches!(self, ConnectorError::RateLimit { .. })
    }

    fn from_exhausted(exhausted: RetriesExhausted<Self>) -> Self {
        ConnectorError::RetriesExhausted(exhausted)
    }
}

/// Invalid retry configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A policy field holds an unusable value.
    #[error("Invalid {field}: {reason}")]
    InvalidField {
        /// Name of the offending field
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// An environment variable could not be parsed.
    #[error("Invalid value for {var}: {value:?}")]
    InvalidEnv {
        /// Environment variable name
        var: &'static str,
        /// The raw value
        value: String,
    },
}
