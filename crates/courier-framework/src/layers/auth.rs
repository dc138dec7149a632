//! Identity extraction and context injection.
//!
//! An [`AuthExtractor`] looks at an update and decides who is asking. The
//! [`AuthLayer`] runs it before every downstream call:
//!
//! - extractor error: the chain stops and the error goes to the error handler
//! - claims: downstream sees `Context::overlay(ctx, claims)`
//! - no claims: downstream sees the context unchanged
//!
//! Any closure `Fn(&Context, &Update) -> Result<Option<Values>, E>` is an
//! extractor, so simple lookups do not need a dedicated type:
//!
//! ```rust,ignore
//! let admins_only = AuthLayer::new(|_ctx: &Context, update: &Update| {
//!     let uid = update.sender().map(|u| u.id);
//!     if uid != Some(ADMIN) {
//!         return Err("not an admin".into());
//!     }
//!     Ok(Some(Values::from([("uid".into(), json!(ADMIN))])))
//! });
//! ```

use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tower::{BoxError, Layer, Service};
use tracing::trace;

use courier_core::{Context, Update, Values};

use crate::handler::Request;

/// Claim key holding the numeric user id.
pub const CLAIM_UID: &str = "uid";
/// Claim key holding the username (empty when the user has none).
pub const CLAIM_SUBJECT: &str = "subject";

/// Derives identity claims from an update.
#[async_trait]
pub trait AuthExtractor: Send + Sync + 'static {
    /// Returns the claims for `update`, or `None` when no identity resolves.
    async fn extract(&self, ctx: &Context, update: &Update) -> Result<Option<Values>, BoxError>;
}

#[async_trait]
impl<F, E> AuthExtractor for F
where
    F: Fn(&Context, &Update) -> Result<Option<Values>, E> + Send + Sync + 'static,
    E: Into<BoxError> + 'static,
{
    async fn extract(&self, ctx: &Context, update: &Update) -> Result<Option<Values>, BoxError> {
        (self)(ctx, update).map_err(Into::into)
    }
}

/// The default extractor: the sender of the update.
///
/// For a callback query that is the user who pressed the button, not the
/// author of the message carrying it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SenderExtractor;

#[async_trait]
impl AuthExtractor for SenderExtractor {
    async fn extract(&self, _ctx: &Context, update: &Update) -> Result<Option<Values>, BoxError> {
        Ok(update.sender().map(|user| {
            Values::from([
                (CLAIM_UID.to_string(), Value::from(user.id)),
                (
                    CLAIM_SUBJECT.to_string(),
                    Value::from(user.username.clone().unwrap_or_default()),
                ),
            ])
        }))
    }
}

/// A tower [`Layer`] injecting extracted claims into the context.
#[derive(Clone)]
pub struct AuthLayer {
    extractor: Arc<dyn AuthExtractor>,
}

impl AuthLayer {
    pub fn new<E: AuthExtractor>(extractor: E) -> Self {
        Self {
            extractor: Arc::new(extractor),
        }
    }

    /// Creates the layer from an already shared extractor.
    pub fn from_arc(extractor: Arc<dyn AuthExtractor>) -> Self {
        Self { extractor }
    }
}

impl Default for AuthLayer {
    fn default() -> Self {
        Self::new(SenderExtractor)
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            extractor: Arc::clone(&self.extractor),
            inner,
        }
    }
}

/// The [`Service`] produced by [`AuthLayer`].
#[derive(Clone)]
pub struct AuthService<S> {
    extractor: Arc<dyn AuthExtractor>,
    inner: S,
}

impl<S> Service<Request> for AuthService<S>
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
        let extractor = Arc::clone(&self.extractor);
        let mut inner = self.inner.clone();

        async move {
            let Request { ctx, update } = request;
            let ctx = match extractor.extract(&ctx, &update).await? {
                Some(claims) => {
                    trace!(claims = claims.len(), "injecting auth claims");
                    Context::overlay(&ctx, claims)
                }
                None => ctx,
            };
            inner.call(Request::new(ctx, update)).await
        }
        .boxed()
    }
}
