//! Retrying platform calls the server asked us to slow down on.

use std::future::Future;

use courier_core::{ApiError, ApiResult};
use tracing::debug;

/// Runs `op`, retrying it while it fails with [`ApiError::RateLimited`].
///
/// Each throttled attempt sleeps exactly the server-specified `retry_after`
/// and spends one unit of `max_retries`; there is no backoff or jitter. Any
/// other error is returned immediately. Once the budget is negative the call
/// fails with [`ApiError::RetriesExceeded`] without another attempt, so `op`
/// runs at most `max_retries + 1` times.
///
/// The sleep does not observe cancellation; keep `max_retries` small to
/// bound how long a caller can be held.
pub async fn retry_on_throttle<F, Fut, T>(max_retries: i32, mut op: F) -> ApiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    let mut budget = i64::from(max_retries);
    loop {
        if budget < 0 {
            return Err(ApiError::RetriesExceeded);
        }
        match op().await {
            Err(ApiError::RateLimited { retry_after }) => {
                debug!(?retry_after, remaining = budget, "throttled, retrying");
                tokio::time::sleep(retry_after).await;
                budget -= 1;
            }
            result => return result,
        }
    }
}
