//! Per-key single-flight execution.
//!
//! [`SingleFlight`] collapses concurrent calls that share a key into one
//! execution: the first caller (the leader) starts the work, later callers
//! arriving while it is still in flight wait for it and receive a clone of
//! its result. The registry entry disappears as soon as the work completes,
//! so the next call with the same key starts fresh.
//!
//! The in-flight work is a [`Shared`] future, so it keeps making progress as
//! long as any caller is still polling it. A follower whose [`Context`] is
//! cancelled stops waiting without disturbing the others.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tracing::trace;

use courier_core::{Context, ContextError};

type Calls<K, T> = Arc<Mutex<HashMap<K, Shared<BoxFuture<'static, T>>>>>;

/// A registry of in-flight calls keyed by `K`, each producing a `T`.
pub struct SingleFlight<K, T> {
    calls: Calls<K, T>,
}

impl<K, T> Default for SingleFlight<K, T> {
    fn default() -> Self {
        Self {
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` unless a call for `key` is already in flight, in which case
    /// waits for that call and returns its result.
    ///
    /// `f` is only invoked by the leader. Followers return
    /// `Err(ContextError)` if `ctx` is cancelled or expires while they wait.
    pub async fn run<F, Fut>(&self, ctx: &Context, key: K, f: F) -> Result<T, ContextError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (call, leader) = {
            let mut calls = self.calls.lock();
            match calls.get(&key) {
                Some(call) => (call.clone(), false),
                None => {
                    let call = Self::lead(Arc::clone(&self.calls), key.clone(), f);
                    calls.insert(key.clone(), call.clone());
                    (call, true)
                }
            }
        };

        if leader {
            return Ok(call.await);
        }

        trace!(key = ?key, "joining in-flight call");
        tokio::select! {
            output = call => Ok(output),
            err = ctx.done() => Err(err),
        }
    }

    /// Wraps `f` so that it runs on first poll, outside the registry lock,
    /// and so that the entry for `key` is removed however the work ends. A
    /// panic is re-raised to every waiter after the entry is gone.
    fn lead<F, Fut>(registry: Calls<K, T>, key: K, f: F) -> Shared<BoxFuture<'static, T>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        async move {
            let output = AssertUnwindSafe(async move { f().await })
                .catch_unwind()
                .await;
            registry.lock().remove(&key);
            match output {
                Ok(output) => output,
                Err(panic) => {
                    trace!(key = ?key, "in-flight call panicked");
                    panic::resume_unwind(panic)
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Number of keys currently in flight.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}

impl<K, T> fmt::Debug for SingleFlight<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.calls.lock().len())
            .finish()
    }
}
