//! Wrapping receiver-bound async operations with backoff.

use super::exponential::ExponentialBackoff;
use crate::config::{RetryPolicy, RetrySettings};
use crate::error::RateLimitError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

/// An async operation invoked on a receiver.
///
/// This is the shape of a connector or chat-model method: a receiver `R`
/// (the method's `self`) plus arguments `A`. Operations taking several
/// arguments use a tuple for `A`. Wrappers produced by
/// [`retry_function_with_exponential_backoff`] and
/// [`retry_with_exponential_backoff`] implement the same trait with the same
/// `R`, `A`, `Output` and `Error`, so a wrapped operation can be used
/// anywhere the original could.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use connector_backoff::error::ConnectorError;
/// use connector_backoff::retry::Operation;
///
/// struct Model {
///     name: String,
/// }
///
/// struct Complete;
///
/// #[async_trait]
/// impl Operation<Model, String> for Complete {
///     type Output = String;
///     type Error = ConnectorError;
///
///     async fn call(&self, model: &Model, prompt: String) -> Result<String, ConnectorError> {
///         Ok(format!("{} says: {}", model.name, prompt))
///     }
/// }
/// ```
#[async_trait]
pub trait Operation<R, A>: Send + Sync
where
    R: ?Sized + Sync,
    A: Send + 'static,
{
    /// Value produced on success.
    type Output: Send;

    /// Error produced on failure.
    type Error: Send;

    /// Invoke the operation on `receiver`.
    async fn call(&self, receiver: &R, args: A) -> Result<Self::Output, Self::Error>;

    /// Whether this operation already retries rate limits.
    ///
    /// [`retry_with_exponential_backoff`] checks this so that wrapping an
    /// operation twice does not compound attempt counts and delays.
    fn has_backoff(&self) -> bool {
        false
    }
}

#[async_trait]
impl<R, A, O> Operation<R, A> for Arc<O>
where
    R: ?Sized + Sync,
    A: Send + 'static,
    O: Operation<R, A> + ?Sized,
{
    type Output = O::Output;
    type Error = O::Error;

    async fn call(&self, receiver: &R, args: A) -> Result<Self::Output, Self::Error> {
        (**self).call(receiver, args).await
    }

    fn has_backoff(&self) -> bool {
        (**self).has_backoff()
    }
}

/// An [`Operation`] backed by a closure or function.
///
/// Created by [`from_fn`].
#[derive(Clone)]
pub struct FnOperation<F> {
    f: F,
}

/// Turn a function returning a boxed future into an [`Operation`].
///
/// # Examples
///
/// ```rust
/// use connector_backoff::error::ConnectorError;
/// use connector_backoff::retry::{from_fn, Operation};
///
/// struct Model {
///     name: String,
/// }
///
/// # async fn example() -> Result<(), ConnectorError> {
/// let complete = from_fn(|model: &Model, prompt: String| {
///     Box::pin(async move { Ok::<_, ConnectorError>(format!("{}: {}", model.name, prompt)) })
/// });
///
/// let model = Model { name: "echo".to_string() };
/// let reply = complete.call(&model, "hi".to_string()).await?;
/// assert_eq!(reply, "echo: hi");
/// # Ok(())
/// # }
/// ```
pub fn from_fn<R, A, T, E, F>(f: F) -> FnOperation<F>
where
    R: ?Sized,
    F: for<'r> Fn(&'r R, A) -> BoxFuture<'r, Result<T, E>>,
{
    FnOperation { f }
}

#[async_trait]
impl<R, A, T, E, F> Operation<R, A> for FnOperation<F>
where
    R: ?Sized + Sync,
    A: Send + 'static,
    T: Send,
    E: Send,
    F: for<'r> Fn(&'r R, A) -> BoxFuture<'r, Result<T, E>> + Send + Sync,
{
    type Output = T;
    type Error = E;

    async fn call(&self, receiver: &R, args: A) -> Result<T, E> {
        (self.f)(receiver, args).await
    }
}

/// An operation retried with a fixed backoff policy.
///
/// Created by [`retry_function_with_exponential_backoff`].
#[derive(Debug, Clone)]
pub struct WithBackoff<O> {
    inner: O,
    backoff: ExponentialBackoff,
}

impl<O> WithBackoff<O> {
    /// Wrap `inner` with an already configured backoff.
    pub fn new(inner: O, backoff: ExponentialBackoff) -> Self {
        Self { inner, backoff }
    }

    /// The wrapped operation.
    pub fn inner(&self) -> &O {
        &self.inner
    }

    /// The backoff applied to each call.
    pub fn backoff(&self) -> &ExponentialBackoff {
        &self.backoff
    }

    /// Unwrap, returning the original operation.
    pub fn into_inner(self) -> O {
        self.inner
    }
}

#[async_trait]
impl<R, A, O> Operation<R, A> for WithBackoff<O>
where
    R: ?Sized + Sync,
    A: Clone + Send + 'static,
    O: Operation<R, A>,
    O::Error: RateLimitError,
{
    type Output = O::Output;
    type Error = O::Error;

    async fn call(&self, receiver: &R, args: A) -> Result<Self::Output, Self::Error> {
        let inner = &self.inner;
        self.backoff
            .execute(move || inner.call(receiver, args.clone()))
            .await
    }

    fn has_backoff(&self) -> bool {
        true
    }
}

/// An operation retried with the policy of the receiver it is called on.
///
/// Created by [`retry_with_exponential_backoff`].
#[derive(Debug, Clone)]
pub struct WithReceiverBackoff<O> {
    inner: O,
}

impl<O> WithReceiverBackoff<O> {
    /// The wrapped operation.
    pub fn inner(&self) -> &O {
        &self.inner
    }

    /// Unwrap, returning the original operation.
    pub fn into_inner(self) -> O {
        self.inner
    }
}

#[async_trait]
impl<R, A, O> Operation<R, A> for WithReceiverBackoff<O>
where
    R: RetrySettings + ?Sized + Sync,
    A: Clone + Send + 'static,
    O: Operation<R, A>,
    O::Error: RateLimitError,
{
    type Output = O::Output;
    type Error = O::Error;

    async fn call(&self, receiver: &R, args: A) -> Result<Self::Output, Self::Error> {
        let inner = &self.inner;

        // Already retrying: adding a second layer would multiply attempts
        if inner.has_backoff() {
            return inner.call(receiver, args).await;
        }

        // Read at call time so per-receiver and runtime changes apply
        let backoff = ExponentialBackoff::from_settings(receiver);
        backoff
            .execute(move || inner.call(receiver, args.clone()))
            .await
    }

    fn has_backoff(&self) -> bool {
        true
    }
}

/// Retry an operation on rate limits with an explicit policy.
///
/// The returned operation has the same receiver, arguments, output and error
/// as `func`. Each call makes up to `max_retries` attempts. After a
/// rate-limited attempt the delay, starting at `initial_delay`, is multiplied
/// by `exponential_base` (and by a random factor in `[1, 2)` when `jitter` is
/// set) before sleeping. Once the budget is spent the call fails with
/// [`RateLimitError::from_exhausted`]; other errors are returned immediately.
///
/// # Examples
///
/// ```rust
/// use connector_backoff::error::ConnectorError;
/// use connector_backoff::retry::{from_fn, retry_function_with_exponential_backoff, Operation};
/// use std::time::Duration;
///
/// struct Model;
///
/// # async fn example() -> Result<(), ConnectorError> {
/// let complete = retry_function_with_exponential_backoff(
///     from_fn(|_model: &Model, prompt: String| {
///         Box::pin(async move { Ok::<_, ConnectorError>(prompt) })
///     }),
///     3,
///     Duration::from_secs(1),
///     2.0,
///     true,
/// );
///
/// let reply = complete.call(&Model, "ping".to_string()).await?;
/// assert_eq!(reply, "ping");
/// # Ok(())
/// # }
/// ```
pub fn retry_function_with_exponential_backoff<O>(
    func: O,
    max_retries: u32,
    initial_delay: Duration,
    exponential_base: f64,
    jitter: bool,
) -> WithBackoff<O> {
    WithBackoff::new(
        func,
        ExponentialBackoff::new(RetryPolicy {
            max_retries,
            initial_delay,
            exponential_base,
            jitter,
        }),
    )
}

/// Retry an operation on rate limits with the policy held by its receiver.
///
/// The receiver's [`RetrySettings`] are read on every call, not when the
/// operation is wrapped. Wrapping an operation that already retries (see
/// [`Operation::has_backoff`]) adds no second retry layer: the result behaves
/// exactly like the operation passed in. This includes operations wrapped by
/// [`retry_function_with_exponential_backoff`], which keep their fixed policy
/// and ignore the receiver's settings.
///
/// # Examples
///
/// ```rust
/// use connector_backoff::config::RetryPolicy;
/// use connector_backoff::error::ConnectorError;
/// use connector_backoff::retry::{from_fn, retry_with_exponential_backoff, Operation};
///
/// # async fn example() -> Result<(), ConnectorError> {
/// // RetryPolicy is itself a valid receiver
/// let echo = retry_with_exponential_backoff(from_fn(|_policy: &RetryPolicy, prompt: String| {
///     Box::pin(async move { Ok::<_, ConnectorError>(prompt) })
/// }));
///
/// let reply = echo.call(&RetryPolicy::default(), "ping".to_string()).await?;
/// assert_eq!(reply, "ping");
/// # Ok(())
/// # }
/// ```
pub fn retry_with_exponential_backoff<O>(func: O) -> WithReceiverBackoff<O> {
    WithReceiverBackoff { inner: func }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectorError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    struct Model {
        policy: RetryPolicy,
        calls: AtomicU32,
        rate_limited_calls: u32,
    }

    impl Model {
        fn new(policy: RetryPolicy, rate_limited_calls: u32) -> Self {
            Self {
                policy,
                calls: AtomicU32::new(0),
                rate_limited_calls,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RetrySettings for Model {
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

    struct Complete;

    #[async_trait]
    impl Operation<Model, String> for Complete {
        type Output = String;
        type Error = ConnectorError;

        async fn call(&self, model: &Model, prompt: String) -> Result<String, ConnectorError> {
            let n = model.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= model.rate_limited_calls {
                Err(ConnectorError::rate_limit(format!("call {}", n)))
            } else {
                Ok(format!("reply to {}", prompt))
            }
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_secs(1),
            exponential_base: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_plain_operations_have_no_backoff() {
        let op = from_fn(|_model: &Model, _prompt: String| {
            Box::pin(async move { Ok::<_, ConnectorError>(()) })
        });
        assert!(!Operation::<Model, String>::has_backoff(&op));
        assert!(!Operation::<Model, String>::has_backoff(&Complete));
    }

    #[test]
    fn test_wrappers_are_marked() {
        let fixed = retry_function_with_exponential_backoff(
            Complete,
            3,
            Duration::from_secs(1),
            2.0,
            false,
        );
        assert!(Operation::<Model, String>::has_backoff(&fixed));

        let per_receiver = retry_with_exponential_backoff(Complete);
        assert!(Operation::<Model, String>::has_backoff(&per_receiver));
        assert!(Operation::<Model, String>::has_backoff(&Arc::new(per_receiver)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_policy_ignores_receiver() {
        // Receiver would allow 10 attempts; the explicit policy allows 2
        let model = Model::new(policy(10), u32::MAX);
        let op = retry_function_with_exponential_backoff(
            Complete,
            2,
            Duration::from_secs(1),
            2.0,
            false,
        );

        let err = op.call(&model, "hi".to_string()).await.unwrap_err();

        assert!(matches!(err, ConnectorError::RetriesExhausted(_)));
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receiver_policy_read_at_call_time() {
        let op = retry_with_exponential_backoff(Complete);

        let mut model = Model::new(policy(2), u32::MAX);
        assert!(op.call(&model, "a".to_string()).await.is_err());
        assert_eq!(model.calls(), 2);

        model.policy.max_retries = 4;
        model.calls.store(0, Ordering::SeqCst);
        assert!(op.call(&model, "b".to_string()).await.is_err());
        assert_eq!(model.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_wrap_does_not_compound() {
        let once = retry_with_exponential_backoff(Complete);
        let twice = retry_with_exponential_backoff(retry_with_exponential_backoff(Complete));

        let model_once = Model::new(policy(3), u32::MAX);
        let start = Instant::now();
        assert!(once.call(&model_once, "x".to_string()).await.is_err());
        let elapsed_once = start.elapsed();

        let model_twice = Model::new(policy(3), u32::MAX);
        let start = Instant::now();
        let err = twice.call(&model_twice, "x".to_string()).await.unwrap_err();
        let elapsed_twice = start.elapsed();

        assert_eq!(model_once.calls(), 3);
        assert_eq!(model_twice.calls(), 3);
        assert_eq!(elapsed_once, elapsed_twice);
        assert_eq!(elapsed_twice, Duration::from_secs(6));

        // The exhaustion error is not itself retried by an outer layer
        match err {
            ConnectorError::RetriesExhausted(exhausted) => assert_eq!(exhausted.attempts(), 3),
            other => panic!("Expected RetriesExhausted, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_receiver_wrap_over_fixed_wrap_keeps_fixed_policy() {
        let fixed = retry_function_with_exponential_backoff(
            Complete,
            2,
            Duration::from_secs(1),
            2.0,
            false,
        );
        let op = retry_with_exponential_backoff(fixed);

        let model = Model::new(policy(5), u32::MAX);
        assert!(op.call(&model, "x".to_string()).await.is_err());
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_rate_limits() {
        let op = retry_with_exponential_backoff(Complete);
        let model = Model::new(policy(5), 2);
        let start = Instant::now();

        let reply = op.call(&model, "hello".to_string()).await.unwrap();

        assert_eq!(reply, "reply to hello");
        assert_eq!(model.calls(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_from_fn_with_tuple_args() {
        let op = retry_function_with_exponential_backoff(
            from_fn(|model: &Model, (prompt, n): (String, usize)| {
                Box::pin(async move {
                    let call = model.calls.fetch_add(1, Ordering::SeqCst);
                    if call == 0 {
                        Err(ConnectorError::rate_limit("busy"))
                    } else {
                        Ok(prompt.repeat(n))
                    }
                })
            }),
            3,
            Duration::from_millis(100),
            2.0,
            false,
        );

        let model = Model::new(policy(1), 0);
        let reply = op.call(&model, ("ab".to_string(), 2)).await.unwrap();
        assert_eq!(reply, "abab");
        assert_eq!(model.calls(), 2);
    }
}
