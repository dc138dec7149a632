//! Rate-limited fan-out of one send operation over many targets.
//!
//! ```rust,ignore
//! let limiter = TokenBucket::per_second(25.0, 1);
//! let options = BroadcastOptions::new()
//!     .with_progress(|p: Progress| tracing::info!(p.index, p.errors, p.total, "broadcast"));
//!
//! deliver(&ctx, &chat_ids, &limiter, |_ctx, &chat_id| {
//!     let client = client.clone();
//!     async move { client.send_text(chat_id, &notice).await.map(|_| ()) }
//! }, options).await?;
//! ```

use std::fmt;
use std::future::Future;

use courier_core::{ApiResult, Context};
use tracing::{debug, warn};

use crate::error::BroadcastError;
use crate::rate_limit::RateLimiter;

/// A progress report: `index` targets have been attempted so far, `errors`
/// of them failed, out of `total`.
///
/// Reported before every send and once more at the end with
/// `index == total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub index: usize,
    pub errors: usize,
    pub total: usize,
}

impl Progress {
    /// Whether this is the final report.
    pub fn is_complete(&self) -> bool {
        self.index == self.total
    }
}

type ProgressSink<'a> = Box<dyn FnMut(Progress) + Send + 'a>;

/// Options for [`deliver`].
#[derive(Default)]
pub struct BroadcastOptions<'a> {
    progress: Option<ProgressSink<'a>>,
    stop_on_first_error: bool,
}

impl<'a> BroadcastOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the progress callback.
    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: FnMut(Progress) + Send + 'a,
    {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Abort on the first failed send instead of counting it (default: `false`).
    pub fn stop_on_first_error(mut self, enabled: bool) -> Self {
        self.stop_on_first_error = enabled;
        self
    }

    fn report(&mut self, progress: Progress) {
        if let Some(sink) = self.progress.as_mut() {
            sink(progress);
        }
    }
}

impl fmt::Debug for BroadcastOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastOptions")
            .field("progress", &self.progress.is_some())
            .field("stop_on_first_error", &self.stop_on_first_error)
            .finish()
    }
}

/// Calls `send` for every target, in order, each after `limiter` admits it.
///
/// Cancellation of `ctx` (checked before each target and during the limiter
/// wait) aborts the whole delivery. Failed sends are counted and skipped
/// unless `stop_on_first_error` is set, in which case the first failure is
/// returned as is.
pub async fn deliver<T, L, F, Fut>(
    ctx: &Context,
    targets: &[T],
    limiter: &L,
    mut send: F,
    mut options: BroadcastOptions<'_>,
) -> Result<(), BroadcastError>
where
    L: RateLimiter + ?Sized,
    F: FnMut(&Context, &T) -> Fut,
    Fut: Future<Output = ApiResult<()>>,
{
    let total = targets.len();
    let mut errors = 0;

    for (index, target) in targets.iter().enumerate() {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }
        options.report(Progress {
            index,
            errors,
            total,
        });
        limiter.wait(ctx).await?;

        if let Err(err) = send(ctx, target).await {
            errors += 1;
            if options.stop_on_first_error {
                warn!(index, error = %err, "broadcast aborted");
                return Err(err.into());
            }
            debug!(index, error = %err, "broadcast send failed");
        }
    }

    options.report(Progress {
        index: total,
        errors,
        total,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use courier_core::{ApiError, ContextError};
    use parking_lot::Mutex;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use crate::rate_limit::{TokenBucket, Unlimited};

    fn failing_at(
        bad: usize,
        sent: Arc<Mutex<Vec<usize>>>,
    ) -> impl FnMut(&Context, &usize) -> std::future::Ready<ApiResult<()>> {
        move |_ctx: &Context, &target: &usize| {
            sent.lock().push(target);
            std::future::ready(if target == bad {
                Err(ApiError::Platform {
                    code: 403,
                    description: "Forbidden: bot was blocked by the user".into(),
                })
            } else {
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_failures_are_counted() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mut reports = Vec::new();
        let limiter = TokenBucket::per_second(10.0, 3);

        let result = deliver(
            &Context::background(),
            &[0, 1, 2],
            &limiter,
            failing_at(1, Arc::clone(&sent)),
            BroadcastOptions::new().with_progress(|p| reports.push(p)),
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(*sent.lock(), vec![0, 1, 2]);
        let last = reports.last().copied().unwrap();
        assert_eq!(
            last,
            Progress {
                index: 3,
                errors: 1,
                total: 3
            }
        );
        assert!(last.is_complete());
        let indices: Vec<_> = reports.iter().map(|p| (p.index, p.errors)).collect();
        assert_eq!(indices, vec![(0, 0), (1, 0), (2, 1), (3, 1)]);
    }

    #[tokio::test]
    async fn test_stop_on_first_error() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mut reports = Vec::new();

        let result = deliver(
            &Context::background(),
            &[0, 1, 2],
            &Unlimited,
            failing_at(1, Arc::clone(&sent)),
            BroadcastOptions::new()
                .with_progress(|p| reports.push(p))
                .stop_on_first_error(true),
        )
        .await;

        assert!(matches!(
            result,
            Err(BroadcastError::Send(ApiError::Platform { code: 403, .. }))
        ));
        assert_eq!(*sent.lock(), vec![0, 1]);
        assert!(reports.iter().all(|p| !p.is_complete()));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let token = CancellationToken::new();
        token.cancel();

        let result = deliver(
            &Context::with_token(token),
            &[0, 1],
            &Unlimited,
            failing_at(9, Arc::clone(&sent)),
            BroadcastOptions::new(),
        )
        .await;

        assert!(matches!(
            result,
            Err(BroadcastError::Context(ContextError::Cancelled))
        ));
        assert!(sent.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_limiter_wait() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            canceller.cancel();
        });

        let limiter = TokenBucket::per_second(1.0, 1);
        let result = deliver(
            &Context::with_token(token),
            &[0, 1, 2, 3],
            &limiter,
            failing_at(9, Arc::clone(&sent)),
            BroadcastOptions::new(),
        )
        .await;

        assert!(matches!(
            result,
            Err(BroadcastError::Context(ContextError::Cancelled))
        ));
        assert_eq!(*sent.lock(), vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_by_limiter() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let limiter = TokenBucket::per_second(2.0, 1);
        let start = Instant::now();

        deliver(
            &Context::background(),
            &[0, 1, 2],
            &limiter,
            failing_at(9, Arc::clone(&sent)),
            BroadcastOptions::new(),
        )
        .await
        .unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(1));
        assert_eq!(sent.lock().len(), 3);
    }
}
