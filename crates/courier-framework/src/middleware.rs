//! Middleware composition.
//!
//! A [`Middleware`] turns a handler into a handler. Any tower [`Layer`] over
//! [`BoxedHandler`] can be converted into one with [`Middleware::layer`], and
//! small ad-hoc middlewares can be written as async closures with
//! [`Middleware::from_fn`].
//!
//! A chain is an ordered list folded once, at bind time, into a single
//! boxed service. The first middleware is the outermost:
//!
//! ```text
//! compose([m1, m2], terminal) == m1(m2(terminal))
//!
//! request ──▶ m1 ──▶ m2 ──▶ terminal
//! result  ◀── m1 ◀── m2 ◀──┘
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use tower::util::BoxCloneSyncService;
use tower::{BoxError, Layer, Service, ServiceExt, service_fn};

use crate::handler::{BoxedHandler, Request};

/// The remainder of a chain, handed to [`Middleware::from_fn`] closures.
///
/// Dropping `Next` without calling [`run`](Next::run) short-circuits the chain.
pub struct Next {
    inner: BoxedHandler,
}

impl Next {
    /// Calls the downstream handler.
    pub async fn run(self, request: Request) -> Result<(), BoxError> {
        self.inner.oneshot(request).await
    }
}

/// A handler-to-handler transformation.
#[derive(Clone)]
pub struct Middleware {
    wrap: Arc<dyn Fn(BoxedHandler) -> BoxedHandler + Send + Sync>,
}

impl Middleware {
    /// Creates a middleware from a wrapping function.
    pub fn new<F>(wrap: F) -> Self
    where
        F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
    {
        Self {
            wrap: Arc::new(wrap),
        }
    }

    /// Creates a middleware from a tower [`Layer`].
    pub fn layer<L>(layer: L) -> Self
    where
        L: Layer<BoxedHandler> + Send + Sync + 'static,
        L::Service: Service<Request, Response = (), Error = BoxError> + Clone + Send + Sync + 'static,
        <L::Service as Service<Request>>::Future: Send + 'static,
    {
        Self::new(move |inner| BoxCloneSyncService::new(layer.layer(inner)))
    }

    /// Creates a middleware from an async closure receiving the request and
    /// the rest of the chain.
    ///
    /// ```rust,ignore
    /// Middleware::from_fn(|req, next| async move {
    ///     tracing::debug!(kind = req.update.kind(), "before");
    ///     let result = next.run(req).await;
    ///     tracing::debug!("after");
    ///     result
    /// })
    /// ```
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Request, Next) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self::new(move |inner| {
            let f = f.clone();
            BoxCloneSyncService::new(service_fn(move |request: Request| {
                let next = Next {
                    inner: inner.clone(),
                };
                f(request, next).boxed()
            }))
        })
    }

    /// Wraps `inner` with this middleware.
    pub fn apply(&self, inner: BoxedHandler) -> BoxedHandler {
        (self.wrap)(inner)
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middleware").finish_non_exhaustive()
    }
}

/// Folds `middlewares` around `terminal`, first element outermost.
pub fn compose<'a, I>(middlewares: I, terminal: BoxedHandler) -> BoxedHandler
where
    I: IntoIterator<Item = &'a Middleware>,
    I::IntoIter: DoubleEndedIterator,
{
    middlewares
        .into_iter()
        .rev()
        .fold(terminal, |inner, middleware| middleware.apply(inner))
}
