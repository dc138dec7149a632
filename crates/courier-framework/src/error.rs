//! Error types for the Courier framework.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tower::BoxError;

use courier_core::{ApiError, ContextError};

use crate::router::RouteKind;

/// Errors raised while binding routes.
#[derive(Debug, Clone, Error)]
pub enum RouteError {
    /// A route with the same pattern is already bound for this kind.
    #[error("{kind} route '{pattern}' is already bound")]
    Duplicate { kind: RouteKind, pattern: String },

    /// The pattern is empty or contains forbidden characters.
    #[error("invalid {kind} route pattern '{pattern}'")]
    InvalidPattern { kind: RouteKind, pattern: String },

    /// A route table entry names an operation without a handler.
    #[error("no handler for operation '{0}'")]
    MissingHandler(String),
}

/// Errors that abort a broadcast.
#[derive(Debug, Clone, Error)]
pub enum BroadcastError {
    /// The execution context was cancelled or timed out.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// A send failed while `stop_on_first_error` was set.
    #[error(transparent)]
    Send(#[from] ApiError),
}

/// Errors from resolving the bot's own identity.
#[derive(Debug, Clone, Error)]
pub enum IdentityError {
    /// `get_me` failed.
    #[error("failed to fetch bot identity: {0}")]
    Api(#[from] ApiError),

    /// The caller gave up waiting for an in-flight refresh.
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// A handler error shared between every caller of a deduplicated call.
///
/// Single-flight results are handed to each waiting caller, so the error has
/// to be clonable; this wraps the original in an `Arc` and forwards
/// `Display` and `source` to it.
#[derive(Clone)]
pub struct SharedError(Arc<dyn StdError + Send + Sync>);

impl SharedError {
    pub fn new(err: BoxError) -> Self {
        Self(Arc::from(err))
    }

    /// Returns the original error.
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.0.as_ref()
    }
}

impl fmt::Debug for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl StdError for SharedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}
