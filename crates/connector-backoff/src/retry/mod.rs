//! Exponential backoff for rate-limited operations.
//!
//! Two ways to add retries to a receiver-bound async operation:
//!
//! - [`retry_function_with_exponential_backoff`] - fixed policy chosen when wrapping
//! - [`retry_with_exponential_backoff`] - policy read from the receiver on each call
//!
//! Both return an [`Operation`] with the same receiver, arguments, output and
//! error as the operation they wrap. [`ExponentialBackoff`] runs the
//! underlying retry loop and can also be used directly with a closure.
//!
//! # Examples
//!
//! ```rust
//! use connector_backoff::config::RetrySettings;
//! use connector_backoff::error::ConnectorError;
//! use connector_backoff::retry::{from_fn, retry_with_exponential_backoff, Operation};
//! use std::time::Duration;
//!
//! struct ChatModel {
//!     max_retries: u32,
//! }
//!
//! impl RetrySettings for ChatModel {
//!     fn initial_delay(&self) -> Duration {
//!         Duration::from_millis(200)
//!     }
//!     fn max_retries(&self) -> u32 {
//!         self.max_retries
//!     }
//!     fn exponential_base(&self) -> f64 {
//!         2.0
//!     }
//!     fn jitter(&self) -> bool {
//!         true
//!     }
//! }
//!
//! # async fn example() -> Result<(), ConnectorError> {
//! let complete = retry_with_exponential_backoff(from_fn(|_model: &ChatModel, prompt: String| {
//!     Box::pin(async move {
//!         // Call the remote API here
//!         Ok::<_, ConnectorError>(format!("echo: {}", prompt))
//!     })
//! }));
//!
//! let model = ChatModel { max_retries: 3 };
//! let reply = complete.call(&model, "hello".to_string()).await?;
//! assert_eq!(reply, "echo: hello");
//! # Ok(())
//! # }
//! ```

mod exponential;
mod operation;

pub use exponential::{ExponentialBackoff, ExponentialBackoffBuilder};
pub use operation::{
    FnOperation, Operation, WithBackoff, WithReceiverBackoff, from_fn,
    retry_function_with_exponential_backoff, retry_with_exponential_backoff,
};
