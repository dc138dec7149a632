//! # Courier Framework
//!
//! The update pipeline built on top of `courier-core`:
//!
//! - Handlers as tower services, and [`Middleware`] to compose them
//! - A two-phase [`Router`] mapping commands and callback routes to handlers
//! - Built-in layers: panic recovery, group mention filtering, callback
//!   deduplication and auth claim injection ([`layers`])
//! - Per-key [`SingleFlight`] execution
//! - Outbound delivery: rate limiting, [`deliver`] for broadcasts,
//!   [`retry_on_throttle`], and reply helpers
//!
//! Nothing here speaks a wire protocol; every platform call goes through
//! [`PlatformClient`](courier_core::PlatformClient).

pub mod broadcast;
pub mod error;
pub mod handler;
pub mod layers;
pub mod middleware;
pub mod rate_limit;
pub mod reply;
pub mod retry;
pub mod router;
pub mod singleflight;

#[cfg(test)]
mod mock;

pub use broadcast::{BroadcastOptions, Progress, deliver};
pub use error::{BroadcastError, IdentityError, RouteError, SharedError};
pub use handler::{BoxedHandler, Handler, HandlerService, Request, into_handler};
pub use layers::{
    AuthExtractor, AuthLayer, BotIdentityCache, DedupLayer, MentionFilterLayer, RecoveryLayer,
    SenderExtractor,
};
pub use middleware::{Middleware, Next, compose};
pub use rate_limit::{RateLimiter, TokenBucket, Unlimited};
pub use reply::{ReplyErrorHandler, send_error_message, send_message};
pub use retry::retry_on_throttle;
pub use router::{ErrorHandler, LogErrorHandler, Route, RouteKind, RouteSpec, Router, RouterBuilder};
pub use singleflight::SingleFlight;

pub use courier_core::{Context, Update};
pub use tower::BoxError;
