//! Duplicate-tap suppression for callback queries.

use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use tower::{BoxError, Layer, Service};
use tracing::debug;

use crate::error::SharedError;
use crate::handler::Request;
use crate::singleflight::SingleFlight;

/// `(chat_id, message_id)` of the message carrying the pressed button.
type DedupKey = (i64, i64);

/// A tower [`Layer`] collapsing concurrent callback queries aimed at the same
/// message into a single downstream call.
///
/// A user hammering a button before the first edit becomes visible produces
/// several callback queries for one origin message. While the first is being
/// handled, the rest wait and receive its result. Message updates bypass the
/// guard.
///
/// Every service produced by one layer shares the same registry, so a single
/// `DedupLayer` applied to several routes deduplicates across all of them.
#[derive(Debug, Clone, Default)]
pub struct DedupLayer {
    flight: Arc<SingleFlight<DedupKey, Result<(), SharedError>>>,
}

impl DedupLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of callback queries currently being handled.
    pub fn in_flight(&self) -> usize {
        self.flight.in_flight()
    }
}

impl<S> Layer<S> for DedupLayer {
    type Service = DedupService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DedupService {
            flight: Arc::clone(&self.flight),
            inner,
        }
    }
}

/// The [`Service`] produced by [`DedupLayer`].
#[derive(Debug, Clone)]
pub struct DedupService<S> {
    flight: Arc<SingleFlight<DedupKey, Result<(), SharedError>>>,
    inner: S,
}

impl<S> Service<Request> for DedupService<S>
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
        let key = match request.update.as_callback_query() {
            Some(query) => (query.message.chat.id, query.message.message_id),
            None => return self.inner.call(request).boxed(),
        };

        let flight = Arc::clone(&self.flight);
        let mut inner = self.inner.clone();

        async move {
            let ctx = request.ctx.clone();
            let result = flight
                .run(&ctx, key, move || {
                    inner
                        .call(request)
                        .map(|result| result.map_err(SharedError::new))
                })
                .await;
            match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(err.into()),
                Err(err) => {
                    debug!(
                        chat_id = key.0,
                        message_id = key.1,
                        "stopped waiting for duplicate callback"
                    );
                    Err(err.into())
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use courier_core::{CallbackQuery, Chat, Context, Message, Update, User};
    use tower::ServiceExt;

    use crate::handler::{BoxedHandler, into_handler};
    use crate::layers::RecoveryLayer;

    fn tap(message_id: i64) -> Update {
        CallbackQuery {
            id: format!("q{message_id}"),
            from: User::default(),
            data: "vote:1".into(),
            message: Message::text(message_id, Chat { id: 10, ..Default::default() }, "poll"),
        }
        .into()
    }

    fn slow_counter(calls: Arc<AtomicUsize>, fail: bool) -> BoxedHandler {
        into_handler(move |_ctx: Context, _update: Update| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                if fail {
                    Err::<(), BoxError>("edit failed".into())
                } else {
                    Ok(())
                }
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_taps_run_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let layer = DedupLayer::new();
        let svc = layer.layer(slow_counter(Arc::clone(&calls), false));

        let results = futures::future::join_all(
            (0..5).map(|_| svc.clone().oneshot(Request::new(Context::background(), tap(1)))),
        )
        .await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(layer.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_followers_receive_leader_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let svc = DedupLayer::new().layer(slow_counter(Arc::clone(&calls), true));

        let (a, b) = tokio::join!(
            svc.clone().oneshot(Request::new(Context::background(), tap(1))),
            svc.clone().oneshot(Request::new(Context::background(), tap(1))),
        );

        assert_eq!(a.unwrap_err().to_string(), "edit failed");
        assert_eq!(b.unwrap_err().to_string(), "edit failed");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_messages_and_plain_messages_bypass() {
        let calls = Arc::new(AtomicUsize::new(0));
        let svc = DedupLayer::new().layer(slow_counter(Arc::clone(&calls), false));
        let text: Update = Message::text(1, Chat::default(), "/start").into();

        let (a, b, c, d) = tokio::join!(
            svc.clone().oneshot(Request::new(Context::background(), tap(1))),
            svc.clone().oneshot(Request::new(Context::background(), tap(2))),
            svc.clone().oneshot(Request::new(Context::background(), text.clone())),
            svc.clone().oneshot(Request::new(Context::background(), text)),
        );

        assert!(a.is_ok() && b.is_ok() && c.is_ok() && d.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_panicking_tap_does_not_block_later_taps() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = {
            let calls = Arc::clone(&calls);
            into_handler(move |_ctx: Context, _update: Update| {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("handler blew up");
                    }
                    Ok::<(), BoxError>(())
                }
            })
        };
        let layer = DedupLayer::new();
        let svc = RecoveryLayer::new().layer(layer.layer(handler));

        let first = svc.clone().oneshot(Request::new(Context::background(), tap(1))).await;
        assert!(first.is_ok());
        assert_eq!(layer.in_flight(), 0);

        let second = svc.clone().oneshot(Request::new(Context::background(), tap(1))).await;
        assert!(second.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(layer.in_flight(), 0);
    }
}
