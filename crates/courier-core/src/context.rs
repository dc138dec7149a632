//! Execution context carried through one pipeline invocation.
//!
//! A [`Context`] bundles three things a handler may need while processing an
//! update:
//!
//! - a cancellation signal ([`CancellationToken`]),
//! - an optional deadline,
//! - a chain of read-through key/value overlays.
//!
//! Overlays are immutable. [`Context::overlay`] returns a new context whose
//! lookups hit the overlay first and fall back to the base; the base is never
//! modified, so sibling dispatches never observe each other's values.
//!
//! ```rust,ignore
//! let ctx = Context::background();
//! let ctx = Context::overlay(&ctx, Values::from([("uid".into(), json!(42))]));
//! assert_eq!(ctx.get("uid"), Some(&json!(42)));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ContextError;

/// Key/value data attached to a context by [`Context::overlay`].
pub type Values = HashMap<String, Value>;

struct ContextInner {
    values: Values,
    parent: Option<Context>,
    token: CancellationToken,
    deadline: Option<Instant>,
}

/// A cheaply clonable execution context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// A root context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// A root context cancelled by `token`.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                values: Values::new(),
                parent: None,
                token,
                deadline: None,
            }),
        }
    }

    /// Returns a child context with its own cancellation token.
    ///
    /// Cancelling the parent cancels the child, not the other way round.
    pub fn child(&self) -> Self {
        self.derive(self.inner.token.child_token(), self.inner.deadline)
    }

    /// Returns a child context that expires at `deadline`.
    ///
    /// An earlier deadline inherited from `self` wins.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.inner.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        };
        self.derive(self.inner.token.clone(), Some(deadline))
    }

    /// Returns a child context that expires after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Layers `data` over `base`.
    ///
    /// Keys present in `data` shadow the same keys in `base`; everything else
    /// (other keys, cancellation, deadline) is delegated to `base`. An empty
    /// `data` returns `base` itself without wrapping it.
    pub fn overlay(base: &Context, data: Values) -> Context {
        if data.is_empty() {
            return base.clone();
        }
        Self {
            inner: Arc::new(ContextInner {
                values: data,
                parent: Some(base.clone()),
                token: base.inner.token.clone(),
                deadline: base.inner.deadline,
            }),
        }
    }

    fn derive(&self, token: CancellationToken, deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                values: Values::new(),
                parent: Some(self.clone()),
                token,
                deadline,
            }),
        }
    }

    /// Looks up `key`, searching from the innermost overlay outwards.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let mut current = self;
        loop {
            if let Some(value) = current.inner.values.get(key) {
                return Some(value);
            }
            current = current.inner.parent.as_ref()?;
        }
    }

    /// Looks up `key` and deserializes it into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Returns the cancellation token of this context.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Returns the deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Returns why the context stopped, or `None` while it is still live.
    pub fn err(&self) -> Option<ContextError> {
        if self.inner.token.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Completes once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ContextError {
        match self.inner.deadline {
            Some(deadline) => tokio::select! {
                _ = self.inner.token.cancelled() => ContextError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
            },
            None => {
                self.inner.token.cancelled().await;
                ContextError::Cancelled
            }
        }
    }

    /// Returns `true` if both handles point at the same context node.
    pub fn ptr_eq(a: &Context, b: &Context) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("values", &self.inner.values)
            .field("has_parent", &self.inner.parent.is_some())
            .field("cancelled", &self.inner.token.is_cancelled())
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}
