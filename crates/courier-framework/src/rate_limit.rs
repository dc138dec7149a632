//! Admission control for outbound sends.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

use courier_core::{Context, ContextError};

/// Decides when the next operation may start.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Waits until one operation is admitted.
    ///
    /// Returns early with the context's error if it is cancelled or its
    /// deadline passes first.
    async fn wait(&self, ctx: &Context) -> Result<(), ContextError>;
}

/// Admits everything immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unlimited;

#[async_trait]
impl RateLimiter for Unlimited {
    async fn wait(&self, ctx: &Context) -> Result<(), ContextError> {
        ctx.err().map_or(Ok(()), Err)
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    updated: Instant,
}

/// A token bucket refilled at `rate` tokens per second, holding at most
/// `burst` tokens.
///
/// Waiting reserves a token up front, so concurrent waiters are admitted in
/// the order they arrived. A waiter that gives up returns its reservation.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl TokenBucket {
    /// A full bucket admitting `rate` operations per second with bursts of up
    /// to `burst` (at least 1).
    ///
    /// A rate that is not a positive finite number disables limiting.
    pub fn per_second(rate: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            rate,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                updated: Instant::now(),
            }),
        }
    }

    fn unlimited(&self) -> bool {
        !(self.rate.is_finite() && self.rate > 0.0)
    }

    /// Takes one token, returning how long the caller must wait before
    /// using it.
    fn reserve(&self) -> Duration {
        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.updated).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.updated = now;
        bucket.tokens -= 1.0;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / self.rate)
        }
    }

    fn cancel_reservation(&self) {
        let mut bucket = self.bucket.lock();
        bucket.tokens = (bucket.tokens + 1.0).min(self.burst);
    }
}

#[async_trait]
impl RateLimiter for TokenBucket {
    async fn wait(&self, ctx: &Context) -> Result<(), ContextError> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        if self.unlimited() {
            return Ok(());
        }

        let delay = self.reserve();
        if delay.is_zero() {
            return Ok(());
        }
        if ctx
            .deadline()
            .is_some_and(|deadline| Instant::now() + delay > deadline)
        {
            self.cancel_reservation();
            return Err(ContextError::DeadlineExceeded);
        }

        trace!(?delay, "rate limited");
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            err = ctx.done() => {
                self.cancel_reservation();
                Err(err)
            }
        }
    }
}
