//! Time source for bounded waits.
//!
//! Readiness polling takes its notion of "now" and its sleeps from a
//! [`Clock`], so tests can drive virtual time instead of sleeping.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Wall clock backed by tokio timers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Virtual clock: `sleep` advances time immediately and returns.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.elapsed.lock() += by;
    }

    /// Virtual time since construction.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.elapsed.lock()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Done(T),
    TimedOut,
}

/// Run `check` every `interval` until it yields a value or `timeout` passes.
///
/// `check` runs once more at the deadline before giving up. Dropping the
/// returned future cancels the wait.
pub async fn poll_until<T, F, Fut>(
    clock: &dyn Clock,
    interval: Duration,
    timeout: Duration,
    mut check: F,
) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = clock.now() + timeout;
    loop {
        if let Some(value) = check().await {
            return PollOutcome::Done(value);
        }
        let now = clock.now();
        if now >= deadline {
            return PollOutcome::TimedOut;
        }
        clock.sleep(interval.min(deadline - now)).await;
    }
}
