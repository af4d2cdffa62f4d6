#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Rate-limit aware retries for async chat-model and connector calls.
//!
//! Remote model APIs answer bursts of traffic with rate-limit errors. This
//! crate wraps a receiver-bound async operation so that rate-limited calls
//! are retried with exponential backoff and jitter, while every other error
//! passes straight through:
//!
//! - **Retry loop** via [`ExponentialBackoff`](retry::ExponentialBackoff)
//!   - Delay grows by `exponential_base`, optionally jittered by a factor in `[1, 2)`
//!   - Non-blocking waits on the tokio timer
//!   - A distinguished error once the attempt budget is spent
//! - **Operation wrappers** with a fixed policy or a policy read from the receiver
//! - **Throttled warnings** so retry storms do not flood the logs
//! - **Configuration** from code, serde formats or the environment
//!
//! # Examples
//!
//! ```rust
//! use connector_backoff::prelude::*;
//! use std::time::Duration;
//!
//! struct Model;
//!
//! # async fn example() -> Result<(), ConnectorError> {
//! let complete = retry_function_with_exponential_backoff(
//!     from_fn(|_model: &Model, prompt: String| {
//!         Box::pin(async move { Ok::<_, ConnectorError>(prompt.to_uppercase()) })
//!     }),
//!     5,
//!     Duration::from_secs(1),
//!     2.0,
//!     true,
//! );
//!
//! let reply = complete.call(&Model, "hello".to_string()).await?;
//! assert_eq!(reply, "HELLO");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod retry;
pub mod throttle;

/// Convenient re-exports of commonly used items.
///
/// Import everything needed to wrap an operation with:
///
/// ```rust
/// use connector_backoff::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{RetryPolicy, RetrySettings};
    pub use crate::error::{ConnectorError, RateLimitError, RetriesExhausted};
    pub use crate::retry::{
        ExponentialBackoff, ExponentialBackoffBuilder, Operation, from_fn,
        retry_function_with_exponential_backoff, retry_with_exponential_backoff,
    };
    pub use crate::throttle::LogThrottle;
}
