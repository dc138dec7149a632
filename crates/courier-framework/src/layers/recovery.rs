//! Panic recovery.

use std::panic::AssertUnwindSafe;
use std::task::{Context as TaskContext, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use tower::{BoxError, Layer, Service};
use tracing::error;

use crate::handler::Request;

/// A tower [`Layer`] that catches panics raised by the inner service.
///
/// A panicking handler is logged at `error` and the update is absorbed: the
/// layer reports success so the error handler never sees it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryLayer;

impl RecoveryLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RecoveryLayer {
    type Service = RecoveryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RecoveryService { inner }
    }
}

/// The [`Service`] produced by [`RecoveryLayer`].
#[derive(Debug, Clone)]
pub struct RecoveryService<S> {
    inner: S,
}

impl<S> Service<Request> for RecoveryService<S>
where
    S: Service<Request, Response = (), Error = BoxError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = ();
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<(), BoxError>>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let kind = request.update.kind();
        let chat_id = request.update.chat_id();
        let mut inner = self.inner.clone();

        async move {
            // A panic while building the future is caught as well as one
            // raised while polling it.
            let future = match std::panic::catch_unwind(AssertUnwindSafe(|| inner.call(request))) {
                Ok(future) => future,
                Err(panic) => {
                    error!(kind, chat_id, panic = panic_message(&*panic), "handler panicked");
                    return Ok(());
                }
            };
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    error!(kind, chat_id, panic = panic_message(&*panic), "handler panicked");
                    Ok(())
                }
            }
        }
        .boxed()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
