//! Retrying a rate-limited chat model
//!
//! Run with:
//! ```sh
//! RUST_LOG=connector_backoff=warn cargo run --example chat_backoff
//! ```
//!
//! The retry policy can be tuned through `CONNECTOR_BACKOFF_*` variables or a
//! `.env` file, e.g. `CONNECTOR_BACKOFF_INITIAL_DELAY=0.05`.

use async_trait::async_trait;
use connector_backoff::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Simulated chat model that rejects its first few requests with 429
struct ChatModel {
    policy: RetryPolicy,
    busy_for: u32,
    requests: AtomicU32,
}

impl ChatModel {
    fn new(policy: RetryPolicy, busy_for: u32) -> Self {
        Self {
            policy,
            busy_for,
            requests: AtomicU32::new(0),
        }
    }

    async fn send(&self, prompt: &str) -> Result<String, ConnectorError> {
        let n = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.busy_for {
            println!("  request {}: 429 Too Many Requests", n);
            return Err(ConnectorError::from_status(429, "slow down", None));
        }
        println!("  request {}: 200 OK", n);
        Ok(format!("echo: {}", prompt))
    }

    fn requests(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }
}

impl RetrySettings for ChatModel {
    fn initial_delay(&self) -> Duration {
        self.policy.initial_delay
    }

    fn max_retries(&self) -> u32 {
        self.policy.max_retries
    }

    fn exponential_base(&self) -> f64 {
        self.policy.exponential_base
    }

    fn jitter(&self) -> bool {
        self.policy.jitter
    }
}

struct GetResponse;

#[async_trait]
impl Operation<ChatModel, String> for GetResponse {
    type Output = String;
    type Error = ConnectorError;

    async fn call(&self, model: &ChatModel, prompt: String) -> Result<String, ConnectorError> {
        model.send(&prompt).await
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let policy = RetryPolicy::from_env()?;
    println!("Retry policy: {:?}", policy);

    example_receiver_policy(policy).await?;
    example_fixed_policy().await?;
    example_exhausted(policy).await;

    Ok(())
}

/// Example 1: the policy comes from the model on every call
async fn example_receiver_policy(policy: RetryPolicy) -> anyhow::Result<()> {
    println!("\n=== Example 1: Policy Read From the Model ===\n");

    let model = ChatModel::new(policy, 2);
    let get_response = retry_with_exponential_backoff(GetResponse);

    let start = Instant::now();
    let reply = get_response.call(&model, "hello".to_string()).await?;

    println!("\nReply: {}", reply);
    println!("Requests: {}, elapsed: {:?}", model.requests(), start.elapsed());
    Ok(())
}

/// Example 2: a fixed policy, independent of the receiver
async fn example_fixed_policy() -> anyhow::Result<()> {
    println!("\n=== Example 2: Fixed Policy ===\n");

    let model = ChatModel::new(RetryPolicy::default(), 3);
    let get_response = retry_function_with_exponential_backoff(
        from_fn(|model: &ChatModel, prompt: String| {
            Box::pin(async move { model.send(&prompt).await })
        }),
        5,
        Duration::from_millis(50),
        2.0,
        false,
    );

    let start = Instant::now();
    let reply = get_response.call(&model, "fixed".to_string()).await?;

    println!("\nReply: {}", reply);
    println!("Expected waits: 100ms + 200ms + 400ms, elapsed: {:?}", start.elapsed());
    Ok(())
}

/// Example 3: giving up once the attempt budget is spent
async fn example_exhausted(policy: RetryPolicy) {
    println!("\n=== Example 3: Budget Exhausted ===\n");

    let policy = RetryPolicy {
        max_retries: 3,
        initial_delay: policy.initial_delay.min(Duration::from_millis(50)),
        ..policy
    };
    let model = ChatModel::new(policy, u32::MAX);
    let get_response = retry_with_exponential_backoff(GetResponse);

    match get_response.call(&model, "never".to_string()).await {
        Ok(reply) => println!("Unexpected reply: {}", reply),
        Err(ConnectorError::RetriesExhausted(exhausted)) => {
            println!("\nGave up: {}", exhausted);
            if let Some(last) = exhausted.last_error() {
                println!("Last error: {}", last);
            }
        }
        Err(other) => println!("Failed without retrying: {}", other),
    }
}
