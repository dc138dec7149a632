//! Handler system for the Courier framework.
//!
//! A handler is the terminal step of a pipeline: an async function that
//! receives the execution [`Context`] and the (possibly rewritten) [`Update`]
//! and reports success or failure.
//!
//! Handlers are wrapped in [`HandlerService`], a `tower::Service<Request>`,
//! so that every cross-cutting concern (recovery, mention filtering, dedup,
//! auth injection, user middlewares) is an ordinary tower [`Layer`] stacked
//! on top.
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_framework::{Context, Update, BoxError};
//!
//! async fn start(ctx: Context, update: Update) -> Result<(), BoxError> {
//!     tracing::info!(uid = ?ctx.get("uid"), "start pressed");
//!     Ok(())
//! }
//!
//! let svc = into_handler(start);
//! ```
//!
//! [`Layer`]: tower::Layer

use std::future::Future;
use std::task::{Context as TaskContext, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use tower::util::BoxCloneSyncService;
use tower::{BoxError, Service};

use courier_core::{Context, Update};

/// The request flowing through a handler chain.
///
/// The update is owned so that the mention filter can rewrite it before
/// downstream handlers see it.
#[derive(Debug, Clone)]
pub struct Request {
    pub ctx: Context,
    pub update: Update,
}

impl Request {
    pub fn new(ctx: Context, update: Update) -> Self {
        Self { ctx, update }
    }
}

/// A type-erased, `Clone + Send + Sync` handler chain.
///
/// Every route stores one of these, built once at bind time.
pub type BoxedHandler = BoxCloneSyncService<Request, (), BoxError>;

// ============================================================================
// Handler Trait
// ============================================================================

/// A terminal update handler.
///
/// Implemented for every async function or closure of the shape
/// `Fn(Context, Update) -> impl Future<Output = Result<(), E>>` where
/// `E: Into<BoxError>`.
pub trait Handler: Clone + Send + Sync + 'static {
    /// Calls the handler.
    fn call(&self, request: Request) -> BoxFuture<'static, Result<(), BoxError>>;
}

impl<F, Fut, E> Handler for F
where
    F: Fn(Context, Update) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError>,
{
    fn call(&self, request: Request) -> BoxFuture<'static, Result<(), BoxError>> {
        (self)(request.ctx, request.update)
            .map(|result| result.map_err(Into::into))
            .boxed()
    }
}

// ============================================================================
// HandlerService
// ============================================================================

/// A tower [`Service`] that calls a single handler.
#[derive(Clone)]
pub struct HandlerService<H> {
    handler: H,
}

impl<H: Handler> HandlerService<H> {
    /// Wraps `handler` in a `HandlerService`.
    pub fn new(handler: H) -> Self {
        Self { handler }
    }
}

impl<H: Handler> Service<Request> for HandlerService<H> {
    type Response = ();
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<(), BoxError>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        self.handler.call(request)
    }
}

/// Converts a handler function into a boxed handler service.
pub fn into_handler<H: Handler>(handler: H) -> BoxedHandler {
    BoxCloneSyncService::new(HandlerService::new(handler))
}
