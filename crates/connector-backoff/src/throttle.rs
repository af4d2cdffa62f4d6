//! Throttling for retry warnings
//!
//! A burst of rate-limited calls would otherwise produce a burst of identical
//! warnings. Every warning the retrier emits goes through a [`LogThrottle`]
//! first; warnings over quota are dropped and counted.

use std::fmt;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Window of the process-wide retry log throttle.
pub const DEFAULT_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Messages allowed per window by the process-wide retry log throttle.
pub const DEFAULT_LOG_MAX_MESSAGES: u32 = 5;

static RETRY_LOG_THROTTLE: LazyLock<Arc<LogThrottle>> = LazyLock::new(|| {
    Arc::new(LogThrottle::new(
        DEFAULT_LOG_INTERVAL,
        DEFAULT_LOG_MAX_MESSAGES,
    ))
});

/// Allows at most `max_messages` log records per `interval`.
///
/// Windows are fixed: the first record after a window has elapsed opens a new
/// one, and the count starts over.
///
/// # Examples
///
/// ```
/// use connector_backoff::throttle::LogThrottle;
/// use std::time::Duration;
///
/// let throttle = LogThrottle::new(Duration::from_secs(5), 2);
/// assert_eq!(throttle.check(), Some(0));
/// assert_eq!(throttle.check(), Some(0));
/// assert_eq!(throttle.check(), None);
/// assert_eq!(throttle.suppressed(), 1);
/// ```
pub struct LogThrottle {
    interval: Duration,
    max_messages: u32,
    window: Mutex<Window>,
}

#[derive(Debug)]
struct Window {
    started: Instant,
    emitted: u32,
    suppressed: u64,
}

impl LogThrottle {
    /// Create a new throttle.
    ///
    /// A `max_messages` of 0 is treated as 1, and a zero `interval` falls back
    /// to a one-second window.
    pub fn new(interval: Duration, max_messages: u32) -> Self {
        let interval = if interval.is_zero() {
            Duration::from_secs(1)
        } else {
            interval
        };

        Self {
            interval,
            max_messages: max_messages.max(1),
            window: Mutex::new(Window {
                started: Instant::now(),
                emitted: 0,
                suppressed: 0,
            }),
        }
    }

    /// The shared throttle used by retry loops that were not given their own.
    ///
    /// Allows [`DEFAULT_LOG_MAX_MESSAGES`] warnings per [`DEFAULT_LOG_INTERVAL`].
    pub fn global() -> Arc<LogThrottle> {
        Arc::clone(&RETRY_LOG_THROTTLE)
    }

    /// Ask to emit one log record.
    ///
    /// Returns `Some(n)` when the record may be emitted, where `n` is the
    /// number of records dropped since the last one that got through, or
    /// `None` when the record should be dropped.
    pub fn check(&self) -> Option<u64> {
        let mut window = self.lock();

        let now = Instant::now();
        if now.duration_since(window.started) >= self.interval {
            window.started = now;
            window.emitted = 0;
        }

        if window.emitted < self.max_messages {
            window.emitted += 1;
            Some(std::mem::take(&mut window.suppressed))
        } else {
            window.suppressed += 1;
            None
        }
    }

    /// Records dropped since the last one that got through.
    pub fn suppressed(&self) -> u64 {
        self.lock().suppressed
    }

    /// Length of the throttling window.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Records allowed per window.
    pub fn max_messages(&self) -> u32 {
        self.max_messages
    }

    // Counters stay consistent even if a holder panicked
    fn lock(&self) -> std::sync::MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LogThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_INTERVAL, DEFAULT_LOG_MAX_MESSAGES)
    }
}

impl fmt::Debug for LogThrottle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogThrottle")
            .field("interval", &self.interval)
            .field("max_messages", &self.max_messages)
            .field("suppressed", &self.suppressed())
            .finish()
    }
}
