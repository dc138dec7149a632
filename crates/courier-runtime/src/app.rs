//! The application shell: a configured pipeline bound to one platform client.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use courier_runtime::{App, config::load_config};
//!
//! let config = load_config()?;
//! let app = App::builder(config, client)
//!     .bind_command("start", start)
//!     .bind_callback("menu", menu)
//!     .build()?;
//!
//! app.run(Context::with_token(shutdown), updates).await;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use courier_core::{ApiResult, BoxedClient, Context, OutgoingMessage, Update};
use courier_framework::{
    AuthExtractor, AuthLayer, BoxedHandler, BroadcastError, BroadcastOptions, DedupLayer,
    ErrorHandler, Handler, MentionFilterLayer, Middleware, RateLimiter, RecoveryLayer, Route,
    RouteSpec, Router, SenderExtractor, TokenBucket, deliver, into_handler, reply,
    retry_on_throttle,
};
use courier_tma::TmaAuth;

use crate::config::CourierConfig;
use crate::error::RuntimeResult;
use crate::logging;

enum Binding {
    Route(Route),
    Table {
        specs: Vec<RouteSpec>,
        handlers: HashMap<String, BoxedHandler>,
    },
}

/// Collects handlers and options for an [`App`].
///
/// Routes are bound in [`build`](Self::build), after the built-in stages and
/// every middleware added here, so the order of builder calls does not
/// matter.
pub struct AppBuilder {
    config: CourierConfig,
    client: BoxedClient,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    auth_extractor: Arc<dyn AuthExtractor>,
    middlewares: Vec<Middleware>,
    bindings: Vec<Binding>,
    fallback: Option<BoxedHandler>,
    limiter: Option<Arc<dyn RateLimiter>>,
}

impl AppBuilder {
    pub fn new(config: CourierConfig, client: BoxedClient) -> Self {
        Self {
            config,
            client,
            error_handler: None,
            auth_extractor: Arc::new(SenderExtractor),
            middlewares: Vec::new(),
            bindings: Vec::new(),
            fallback: None,
            limiter: None,
        }
    }

    /// Replaces the error handler (default: log only).
    pub fn error_handler<E: ErrorHandler>(mut self, handler: E) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Reports handler errors back to the user as well as logging them.
    pub fn reply_errors(self) -> Self {
        let handler = reply::ReplyErrorHandler::new(Arc::clone(&self.client));
        self.error_handler(handler)
    }

    /// Sets the handler for updates that match no route.
    pub fn fallback<H: Handler>(mut self, handler: H) -> Self {
        self.fallback = Some(into_handler(handler));
        self
    }

    /// Replaces how identity claims are derived (default: the sender).
    pub fn auth_extractor<E: AuthExtractor>(mut self, extractor: E) -> Self {
        self.auth_extractor = Arc::new(extractor);
        self
    }

    /// Appends a middleware. User middlewares run inside the built-in stages,
    /// in the order they were added.
    pub fn middleware(mut self, middleware: Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Replaces the broadcast limiter built from `broadcast.rate_per_sec`.
    pub fn rate_limiter<L: RateLimiter + 'static>(mut self, limiter: L) -> Self {
        self.limiter = Some(Arc::new(limiter));
        self
    }

    pub fn bind(mut self, route: Route) -> Self {
        self.bindings.push(Binding::Route(route));
        self
    }

    pub fn bind_command<H: Handler>(self, name: impl Into<String>, handler: H) -> Self {
        self.bind(Route::command(name, handler))
    }

    pub fn bind_callback<H: Handler>(self, route: impl Into<String>, handler: H) -> Self {
        self.bind(Route::callback(route, handler))
    }

    /// Alias of [`fallback`](Self::fallback).
    pub fn bind_fallback<H: Handler>(self, handler: H) -> Self {
        self.fallback(handler)
    }

    /// Binds a route table: each spec's command and callback are routed to
    /// the handler registered under its operation name.
    pub fn bind_routes(
        mut self,
        specs: impl IntoIterator<Item = RouteSpec>,
        handlers: HashMap<String, BoxedHandler>,
    ) -> Self {
        self.bindings.push(Binding::Table {
            specs: specs.into_iter().collect(),
            handlers,
        });
        self
    }

    /// The built-in stages enabled by configuration, outermost first.
    fn builtin_middlewares(&self) -> Vec<Middleware> {
        let pipeline = &self.config.pipeline;
        let mut chain = Vec::new();
        if pipeline.recovery {
            chain.push(Middleware::layer(RecoveryLayer::new()));
        }
        if pipeline.mention.enabled {
            let layer = MentionFilterLayer::new(
                Arc::clone(&self.client),
                pipeline.mention.info_expire(),
            )
            .trim_mention(pipeline.mention.trim_mention);
            chain.push(Middleware::layer(layer));
        }
        if pipeline.dedup {
            chain.push(Middleware::layer(DedupLayer::new()));
        }
        if pipeline.auth {
            chain.push(Middleware::layer(AuthLayer::from_arc(Arc::clone(
                &self.auth_extractor,
            ))));
        }
        chain
    }

    /// Binds every route and freezes the pipeline.
    pub fn build(self) -> RuntimeResult<App> {
        let mut router = Router::builder();
        for middleware in self.builtin_middlewares().into_iter().chain(self.middlewares) {
            router.middleware(middleware);
        }
        if let Some(handler) = self.error_handler {
            router.error_handler_arc(handler);
        }
        if let Some(fallback) = self.fallback {
            router.bind_fallback_service(fallback);
        }
        for binding in self.bindings {
            match binding {
                Binding::Route(route) => router.bind(route)?,
                Binding::Table { specs, handlers } => router.bind_table(&specs, &handlers)?,
            };
        }
        let router = router.build();

        let broadcast = &self.config.broadcast;
        let limiter = self.limiter.unwrap_or_else(|| {
            Arc::new(TokenBucket::per_second(broadcast.rate_per_sec, broadcast.burst))
        });
        let tma = (!self.config.bot.token.is_empty())
            .then(|| TmaAuth::new(self.config.bot.token.clone(), self.config.tma.max_age()));

        info!(
            routes = router.route_count(),
            recovery = self.config.pipeline.recovery,
            mention = self.config.pipeline.mention.enabled,
            dedup = self.config.pipeline.dedup,
            "application built"
        );

        Ok(App {
            inner: Arc::new(AppInner {
                config: self.config,
                client: self.client,
                router,
                limiter,
                tma,
            }),
        })
    }
}

impl fmt::Debug for AppBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppBuilder")
            .field("config", &self.config)
            .field("middlewares", &self.middlewares.len())
            .field("bindings", &self.bindings.len())
            .finish_non_exhaustive()
    }
}

struct AppInner {
    config: CourierConfig,
    client: BoxedClient,
    router: Router,
    limiter: Arc<dyn RateLimiter>,
    tma: Option<TmaAuth>,
}

/// A built application. Cheap to clone.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

impl App {
    pub fn builder(config: CourierConfig, client: BoxedClient) -> AppBuilder {
        AppBuilder::new(config, client)
    }

    /// Initializes logging from `config.logging`, then starts a builder.
    pub fn from_config(config: CourierConfig, client: BoxedClient) -> AppBuilder {
        logging::init_from_config(&config.logging);
        AppBuilder::new(config, client)
    }

    pub fn config(&self) -> &CourierConfig {
        &self.inner.config
    }

    pub fn client(&self) -> &BoxedClient {
        &self.inner.client
    }

    pub fn router(&self) -> &Router {
        &self.inner.router
    }

    /// The launch token codec, present when a bot token is configured.
    pub fn tma_auth(&self) -> Option<&TmaAuth> {
        self.inner.tma.as_ref()
    }

    /// Runs one update through the pipeline.
    pub async fn dispatch(&self, ctx: Context, update: Update) {
        self.inner.router.dispatch(ctx, update).await
    }

    /// Dispatches every update from `updates`, each on its own task, until
    /// the stream ends or `ctx` is done. Returns once all started dispatches
    /// have finished.
    ///
    /// Dispatches get a child of `ctx`, so stopping `ctx` also interrupts
    /// their dedup and rate limiter waits.
    pub async fn run<S>(&self, ctx: Context, updates: S)
    where
        S: Stream<Item = Update>,
    {
        let mut updates = pin!(updates);
        let mut tasks = JoinSet::new();

        info!("update loop started");
        loop {
            tokio::select! {
                reason = ctx.done() => {
                    info!(%reason, "update loop stopping");
                    break;
                }
                next = updates.next() => {
                    let Some(update) = next else {
                        debug!("update stream ended");
                        break;
                    };
                    let router = self.inner.router.clone();
                    let ctx = ctx.child();
                    tasks.spawn(async move { router.dispatch(ctx, update).await });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(err) = joined {
                        error!(error = %err, "dispatch task failed");
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "dispatch task failed");
            }
        }
        info!("update loop stopped");
    }

    /// [`run`](Self::run) until Ctrl+C (or SIGTERM on unix).
    pub async fn run_until_signal<S>(&self, updates: S)
    where
        S: Stream<Item = Update>,
    {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            wait_for_shutdown().await;
            trigger.cancel();
        });
        self.run(Context::with_token(token), updates).await
    }

    /// Answers `update` with `message`; see [`reply::send_message`].
    pub async fn send_message(&self, update: &Update, message: &OutgoingMessage) -> ApiResult<()> {
        reply::send_message(self.inner.client.as_ref(), update, message).await
    }

    /// Sends to every target with the configured pacing, retrying sends the
    /// platform throttles.
    ///
    /// `send` is called once per attempt; targets are cloned into it.
    pub async fn broadcast<T, F, Fut>(
        &self,
        ctx: &Context,
        targets: &[T],
        send: F,
    ) -> Result<(), BroadcastError>
    where
        T: Clone,
        F: Fn(BoxedClient, T) -> Fut,
        Fut: Future<Output = ApiResult<()>>,
    {
        let options = BroadcastOptions::new()
            .stop_on_first_error(self.inner.config.broadcast.stop_on_first_error);
        self.broadcast_with(ctx, targets, send, options).await
    }

    /// [`broadcast`](Self::broadcast) with explicit options, e.g. a
    /// progress callback.
    pub async fn broadcast_with<T, F, Fut>(
        &self,
        ctx: &Context,
        targets: &[T],
        send: F,
        options: BroadcastOptions<'_>,
    ) -> Result<(), BroadcastError>
    where
        T: Clone,
        F: Fn(BoxedClient, T) -> Fut,
        Fut: Future<Output = ApiResult<()>>,
    {
        let max_retries = self.inner.config.broadcast.max_retries;
        let client = &self.inner.client;
        let send = &send;

        deliver(
            ctx,
            targets,
            self.inner.limiter.as_ref(),
            |_ctx: &Context, target: &T| {
                let target = target.clone();
                async move {
                    retry_on_throttle(max_retries, || send(Arc::clone(client), target.clone()))
                        .await
                }
            },
            options,
        )
        .await
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("router", &self.inner.router)
            .field("tma", &self.inner.tma)
            .finish_non_exhaustive()
    }
}

/// Waits for Ctrl+C, or SIGTERM on unix.
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            Err(err) => {
                error!(error = %err, "cannot listen for SIGTERM");
                let _ = signal::ctrl_c().await;
                info!("Received Ctrl+C, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "cannot listen for Ctrl+C");
        }
        info!("Received Ctrl+C, shutting down");
    }
}
