//! Update routing.
//!
//! Routing happens in two phases:
//!
//! 1. **Binding.** Routes are added to a [`RouterBuilder`]. Each route's
//!    middleware chain (the builder's global middlewares as they stand at
//!    bind time, followed by the route's own) is folded around its handler
//!    once, here.
//! 2. **Dispatch.** [`RouterBuilder::build`] freezes the table into a
//!    [`Router`]. Lookups are read-only, so one router can serve any number
//!    of concurrent dispatches.
//!
//! ```rust,ignore
//! let mut builder = Router::builder();
//! builder.middleware(Middleware::layer(RecoveryLayer::new()));
//! builder.bind_command("start", start)?;
//! builder.bind(Route::callback("page", page).with(audit))?;
//! let router = builder.build();
//!
//! router.dispatch(ctx, update).await;
//! ```
//!
//! Commands match the first word of the message text, exactly: `/start` and
//! `/start@some_bot` both select the `start` route, `/starting` does not.
//! Callback queries match by the route prefix of their `route:payload` data.
//! Everything else goes to the fallback, which by default only logs.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tower::{BoxError, ServiceExt};
use tracing::{Instrument, debug, error, info, info_span};

use courier_core::{Context, Update, split_route};

use crate::error::RouteError;
use crate::handler::{BoxedHandler, Handler, Request, into_handler};
use crate::middleware::{Middleware, compose};

// ============================================================================
// Routes
// ============================================================================

/// What part of an update a route matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteKind {
    /// The leading `/command` of a message.
    Command,
    /// The route prefix of callback query data.
    Callback,
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command => f.write_str("command"),
            Self::Callback => f.write_str("callback"),
        }
    }
}

/// A pattern bound to a handler, with optional per-route middlewares.
pub struct Route {
    kind: RouteKind,
    pattern: String,
    handler: BoxedHandler,
    middlewares: Vec<Middleware>,
}

impl Route {
    /// A route from an already boxed handler chain.
    pub fn new(kind: RouteKind, pattern: impl Into<String>, handler: BoxedHandler) -> Self {
        Self {
            kind,
            pattern: pattern.into(),
            handler,
            middlewares: Vec::new(),
        }
    }

    /// A command route. The leading `/` is optional.
    pub fn command<H: Handler>(name: impl Into<String>, handler: H) -> Self {
        Self::new(RouteKind::Command, name, into_handler(handler))
    }

    /// A callback route matching data of the form `route:payload`.
    pub fn callback<H: Handler>(route: impl Into<String>, handler: H) -> Self {
        Self::new(RouteKind::Callback, route, into_handler(handler))
    }

    /// Appends a middleware that applies to this route only (builder pattern).
    ///
    /// Route middlewares run inside the router's global middlewares.
    pub fn with(mut self, middleware: Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn kind(&self) -> RouteKind {
        self.kind
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("kind", &self.kind)
            .field("pattern", &self.pattern)
            .field("middlewares", &self.middlewares.len())
            .finish_non_exhaustive()
    }
}

/// One row of a route table: an operation name and the command and/or
/// callback route that should reach it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
}

impl RouteSpec {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    /// Reads the `command` and `callback_query` keys of operation metadata.
    /// Empty values count as absent.
    pub fn from_metadata(operation: impl Into<String>, metadata: &HashMap<String, String>) -> Self {
        let pick = |key: &str| metadata.get(key).filter(|v| !v.is_empty()).cloned();
        Self {
            operation: operation.into(),
            command: pick("command"),
            callback: pick("callback_query"),
        }
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn callback(mut self, callback: impl Into<String>) -> Self {
        self.callback = Some(callback.into());
        self
    }
}

// ============================================================================
// Error handling
// ============================================================================

/// Receives every error that escapes a route's handler chain.
#[async_trait]
pub trait ErrorHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: &Context, update: &Update, err: &BoxError);
}

#[async_trait]
impl<F> ErrorHandler for F
where
    F: Fn(&Context, &Update, &BoxError) + Send + Sync + 'static,
{
    async fn handle(&self, ctx: &Context, update: &Update, err: &BoxError) {
        (self)(ctx, update, err)
    }
}

/// Logs the error and does nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogErrorHandler;

#[async_trait]
impl ErrorHandler for LogErrorHandler {
    async fn handle(&self, _ctx: &Context, update: &Update, err: &BoxError) {
        error!(
            kind = update.kind(),
            chat_id = update.chat_id(),
            error = %err,
            "handler failed"
        );
    }
}

fn unrouted_handler() -> BoxedHandler {
    into_handler(|_ctx: Context, update: Update| async move {
        match &update {
            Update::Message(message) => {
                info!(chat_id = message.chat.id, text = %message.text, "unrouted message")
            }
            Update::CallbackQuery(query) => {
                info!(chat_id = query.message.chat.id, data = %query.data, "unrouted callback query")
            }
        }
        Ok::<(), BoxError>(())
    })
}

// ============================================================================
// RouterBuilder
// ============================================================================

/// Collects routes before dispatch starts.
///
/// Binding is append-only. A pattern can be bound once per kind.
pub struct RouterBuilder {
    middlewares: Vec<Middleware>,
    commands: HashMap<String, BoxedHandler>,
    callbacks: HashMap<String, BoxedHandler>,
    fallback: Option<BoxedHandler>,
    error_handler: Arc<dyn ErrorHandler>,
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self {
            middlewares: Vec::new(),
            commands: HashMap::new(),
            callbacks: HashMap::new(),
            fallback: None,
            error_handler: Arc::new(LogErrorHandler),
        }
    }
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a global middleware.
    ///
    /// Global middlewares are captured when a route is bound, so this only
    /// affects routes bound afterwards.
    pub fn middleware(&mut self, middleware: Middleware) -> &mut Self {
        self.middlewares.push(middleware);
        self
    }

    /// Replaces the error handler (default: [`LogErrorHandler`]).
    pub fn error_handler<E: ErrorHandler>(&mut self, handler: E) -> &mut Self {
        self.error_handler = Arc::new(handler);
        self
    }

    /// Replaces the error handler with an already shared one.
    pub fn error_handler_arc(&mut self, handler: Arc<dyn ErrorHandler>) -> &mut Self {
        self.error_handler = handler;
        self
    }

    /// Binds a route.
    pub fn bind(&mut self, route: Route) -> Result<&mut Self, RouteError> {
        let Route {
            kind,
            pattern,
            handler,
            middlewares,
        } = route;

        let (table, pattern) = match kind {
            RouteKind::Command => (&mut self.commands, canonical_command(&pattern)?),
            RouteKind::Callback => (&mut self.callbacks, canonical_callback(&pattern)?),
        };
        if table.contains_key(&pattern) {
            return Err(RouteError::Duplicate { kind, pattern });
        }

        let chain = compose(self.middlewares.iter().chain(&middlewares), handler);
        debug!(%kind, %pattern, "route bound");
        table.insert(pattern, chain);
        Ok(self)
    }

    /// Binds a command handler. `name` may omit the leading `/`.
    pub fn bind_command<H: Handler>(
        &mut self,
        name: impl Into<String>,
        handler: H,
    ) -> Result<&mut Self, RouteError> {
        self.bind(Route::command(name, handler))
    }

    /// Binds a callback handler for data `route:payload`.
    pub fn bind_callback<H: Handler>(
        &mut self,
        route: impl Into<String>,
        handler: H,
    ) -> Result<&mut Self, RouteError> {
        self.bind(Route::callback(route, handler))
    }

    /// Sets the handler for updates no route matches, wrapped in the
    /// current global middlewares.
    pub fn bind_fallback<H: Handler>(&mut self, handler: H) -> &mut Self {
        self.bind_fallback_service(into_handler(handler))
    }

    /// [`bind_fallback`](Self::bind_fallback) for an already boxed chain.
    pub fn bind_fallback_service(&mut self, handler: BoxedHandler) -> &mut Self {
        self.fallback = Some(compose(&self.middlewares, handler));
        self
    }

    /// Binds every row of `specs` to the handler registered for its
    /// operation. Rows naming neither a command nor a callback are skipped.
    pub fn bind_table(
        &mut self,
        specs: &[RouteSpec],
        handlers: &HashMap<String, BoxedHandler>,
    ) -> Result<&mut Self, RouteError> {
        for spec in specs {
            if spec.command.is_none() && spec.callback.is_none() {
                continue;
            }
            let handler = handlers
                .get(&spec.operation)
                .ok_or_else(|| RouteError::MissingHandler(spec.operation.clone()))?;
            if let Some(command) = &spec.command {
                self.bind(Route::new(RouteKind::Command, command, handler.clone()))?;
            }
            if let Some(callback) = &spec.callback {
                self.bind(Route::new(RouteKind::Callback, callback, handler.clone()))?;
            }
        }
        Ok(self)
    }

    /// Freezes the table.
    pub fn build(self) -> Router {
        Router {
            inner: Arc::new(RouterInner {
                commands: self.commands,
                callbacks: self.callbacks,
                fallback: self.fallback.unwrap_or_else(unrouted_handler),
                error_handler: self.error_handler,
            }),
        }
    }
}

impl fmt::Debug for RouterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterBuilder")
            .field("middlewares", &self.middlewares.len())
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .field("callbacks", &self.callbacks.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn canonical_command(name: &str) -> Result<String, RouteError> {
    let bare = name.strip_prefix('/').unwrap_or(name);
    if bare.is_empty() || bare.contains(|c: char| c.is_whitespace() || c == '@' || c == '/') {
        return Err(RouteError::InvalidPattern {
            kind: RouteKind::Command,
            pattern: name.to_string(),
        });
    }
    Ok(format!("/{bare}"))
}

fn canonical_callback(route: &str) -> Result<String, RouteError> {
    if route.is_empty() || route.contains(courier_core::codec::ROUTE_SEPARATOR) {
        return Err(RouteError::InvalidPattern {
            kind: RouteKind::Callback,
            pattern: route.to_string(),
        });
    }
    Ok(route.to_string())
}

// ============================================================================
// Router
// ============================================================================

struct RouterInner {
    commands: HashMap<String, BoxedHandler>,
    callbacks: HashMap<String, BoxedHandler>,
    fallback: BoxedHandler,
    error_handler: Arc<dyn ErrorHandler>,
}

/// An immutable route table. Cheap to clone.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Returns the kind and pattern of the route `update` would reach, or
    /// `None` if it would go to the fallback.
    pub fn resolve(&self, update: &Update) -> Option<(RouteKind, &str)> {
        self.lookup(update).map(|(kind, pattern, _)| (kind, pattern))
    }

    fn lookup(&self, update: &Update) -> Option<(RouteKind, &str, &BoxedHandler)> {
        match update {
            Update::Message(message) => {
                let token = message.text.split_whitespace().next()?;
                let command = token.split_once('@').map_or(token, |(command, _)| command);
                let (pattern, handler) = self.inner.commands.get_key_value(command)?;
                Some((RouteKind::Command, pattern.as_str(), handler))
            }
            Update::CallbackQuery(query) => {
                let (route, _) = split_route(&query.data)?;
                let (pattern, handler) = self.inner.callbacks.get_key_value(route)?;
                Some((RouteKind::Callback, pattern.as_str(), handler))
            }
        }
    }

    /// Runs `update` through its route.
    ///
    /// Errors never escape: they are handed to the error handler.
    pub async fn dispatch(&self, ctx: Context, update: Update) {
        let span = info_span!("dispatch", kind = update.kind(), chat_id = update.chat_id());
        async {
            let handler = match self.lookup(&update) {
                Some((kind, pattern, handler)) => {
                    debug!(%kind, pattern, "route matched");
                    handler.clone()
                }
                None => self.inner.fallback.clone(),
            };
            // the chain may rewrite the update; the error handler sees it as received
            if let Err(err) = handler
                .oneshot(Request::new(ctx.clone(), update.clone()))
                .await
            {
                self.inner.error_handler.handle(&ctx, &update, &err).await;
            }
        }
        .instrument(span)
        .await
    }

    /// Number of bound command and callback routes.
    pub fn route_count(&self) -> usize {
        self.inner.commands.len() + self.inner.callbacks.len()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("commands", &self.inner.commands.keys().collect::<Vec<_>>())
            .field("callbacks", &self.inner.callbacks.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::{CallbackQuery, Chat, Message, User};
    use parking_lot::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn text(text: &str) -> Update {
        Message::text(1, Chat::default(), text).into()
    }

    fn tap(data: &str) -> Update {
        CallbackQuery {
            id: "q".into(),
            from: User::default(),
            data: data.into(),
            message: Message::text(2, Chat::default(), "menu"),
        }
        .into()
    }

    fn named(name: &'static str, log: &Log) -> impl Handler {
        let log = Arc::clone(log);
        move |_ctx: Context, _update: Update| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(name.to_string());
                Ok::<(), BoxError>(())
            }
        }
    }

    fn tagging(tag: &'static str, log: &Log) -> Middleware {
        let log = Arc::clone(log);
        Middleware::from_fn(move |req, next| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(tag.to_string());
                next.run(req).await
            }
        })
    }

    #[tokio::test]
    async fn test_command_routing() {
        let log = Log::default();
        let mut builder = Router::builder();
        builder.bind_command("start", named("start", &log)).unwrap();
        builder.bind_command("/help", named("help", &log)).unwrap();
        let router = builder.build();

        for input in ["/start", "/start@courier_bot arg", "/help me", "/starting", "hello /start"] {
            router.dispatch(Context::background(), text(input)).await;
        }
        assert_eq!(*log.lock(), vec!["start", "start", "help"]);
        assert_eq!(router.resolve(&text("/start x")), Some((RouteKind::Command, "/start")));
        assert_eq!(router.resolve(&text("")), None);
    }

    #[tokio::test]
    async fn test_callback_routing() {
        let log = Log::default();
        let mut builder = Router::builder();
        builder.bind_callback("page", named("page", &log)).unwrap();
        let router = builder.build();

        router.dispatch(Context::background(), tap("page:[2]")).await;
        router.dispatch(Context::background(), tap("pages:[2]")).await;
        router.dispatch(Context::background(), tap("page")).await;

        assert_eq!(*log.lock(), vec!["page"]);
    }

    #[tokio::test]
    async fn test_fallback_and_middleware_snapshot() {
        let log = Log::default();
        let mut builder = Router::builder();
        builder.middleware(tagging("global", &log));
        builder.bind_command("a", named("a", &log)).unwrap();
        builder.middleware(tagging("late", &log));
        builder
            .bind(Route::command("b", named("b", &log)).with(tagging("route", &log)))
            .unwrap();
        builder.bind_fallback(named("fallback", &log));
        let router = builder.build();

        router.dispatch(Context::background(), text("/a")).await;
        router.dispatch(Context::background(), text("/b")).await;
        router.dispatch(Context::background(), text("/c")).await;

        assert_eq!(
            *log.lock(),
            vec![
                "global", "a", //
                "global", "late", "route", "b", //
                "global", "late", "fallback",
            ]
        );
    }

    #[test]
    fn test_bind_errors() {
        let noop = |_ctx: Context, _update: Update| async { Ok::<(), BoxError>(()) };
        let mut builder = Router::builder();
        builder.bind_command("start", noop).unwrap();

        assert!(matches!(
            builder.bind_command("/start", noop),
            Err(RouteError::Duplicate { kind: RouteKind::Command, .. })
        ));
        assert!(matches!(
            builder.bind_callback("a:b", noop),
            Err(RouteError::InvalidPattern { kind: RouteKind::Callback, .. })
        ));
        assert!(matches!(
            builder.bind_command("/", noop),
            Err(RouteError::InvalidPattern { kind: RouteKind::Command, .. })
        ));
        // same pattern, different kind
        builder.bind_callback("start", noop).unwrap();
        assert_eq!(builder.build().route_count(), 2);
    }

    #[tokio::test]
    async fn test_errors_reach_error_handler() {
        let seen: Log = Log::default();
        let sink = Arc::clone(&seen);
        let mut builder = Router::builder();
        builder.error_handler(move |_ctx: &Context, update: &Update, err: &BoxError| {
            sink.lock().push(format!("{}: {err}", update.kind()));
        });
        builder
            .bind_command("fail", |_ctx: Context, _update: Update| async {
                Err::<(), _>("boom")
            })
            .unwrap();
        let router = builder.build();

        router.dispatch(Context::background(), text("/fail")).await;
        assert_eq!(*seen.lock(), vec!["message: boom"]);
    }

    #[tokio::test]
    async fn test_bind_table() {
        let log = Log::default();
        let handlers = HashMap::from([
            ("ListItems".to_string(), into_handler(named("list", &log))),
            ("Ping".to_string(), into_handler(named("ping", &log))),
        ]);
        let specs = vec![
            RouteSpec::new("ListItems").command("list").callback("list"),
            RouteSpec::from_metadata(
                "Ping",
                &HashMap::from([
                    ("command".to_string(), "ping".to_string()),
                    ("callback_query".to_string(), String::new()),
                ]),
            ),
            RouteSpec::new("Internal"),
        ];

        let mut builder = Router::builder();
        builder.bind_table(&specs, &handlers).unwrap();
        let router = builder.build();
        assert_eq!(router.route_count(), 3);

        router.dispatch(Context::background(), tap("list:[1]")).await;
        router.dispatch(Context::background(), text("/ping")).await;
        assert_eq!(*log.lock(), vec!["list", "ping"]);

        let mut builder = Router::builder();
        let missing = [RouteSpec::new("Gone").command("gone")];
        assert!(matches!(
            builder.bind_table(&missing, &handlers),
            Err(RouteError::MissingHandler(op)) if op == "Gone"
        ));
    }
}
