use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream;
use parking_lot::Mutex;
use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use courier_core::{
    ApiError, ApiResult, BotIdentity, BoxedClient, CallbackQuery, Chat, ChatKind, Context,
    EntityKind, Message, MessageEntity, OutgoingMessage, PlatformClient, Update, User,
};
use courier_framework::{BoxError, BroadcastError, BroadcastOptions, RouteError, RouteSpec, into_handler};
use courier_runtime::{App, CourierConfig, RuntimeError};
use courier_tma::{TmaClaims, TmaUser};

const BOT_ID: i64 = 77;
const BOT_USERNAME: &str = "relay_bot";

#[derive(Default)]
struct RecordingClient {
    sent: Mutex<Vec<(i64, String)>>,
    answered: Mutex<Vec<(String, Option<String>)>>,
    throttle_once: Mutex<HashSet<i64>>,
    fail_for: HashSet<i64>,
    get_me_calls: AtomicUsize,
}

impl RecordingClient {
    fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl PlatformClient for RecordingClient {
    async fn send_text(&self, chat_id: i64, message: &OutgoingMessage) -> ApiResult<i64> {
        if self.throttle_once.lock().remove(&chat_id) {
            return Err(ApiError::RateLimited {
                retry_after: Duration::from_secs(2),
            });
        }
        if self.fail_for.contains(&chat_id) {
            return Err(ApiError::Platform {
                code: 403,
                description: "Forbidden: bot was blocked by the user".into(),
            });
        }
        let mut sent = self.sent.lock();
        sent.push((chat_id, message.text.clone()));
        Ok(sent.len() as i64)
    }

    async fn send_photo(&self, chat_id: i64, message: &OutgoingMessage) -> ApiResult<i64> {
        self.send_text(chat_id, message).await
    }

    async fn edit_text(&self, chat_id: i64, _id: i64, message: &OutgoingMessage) -> ApiResult<()> {
        self.send_text(chat_id, message).await.map(|_| ())
    }

    async fn edit_caption(
        &self,
        chat_id: i64,
        _id: i64,
        message: &OutgoingMessage,
    ) -> ApiResult<()> {
        self.send_text(chat_id, message).await.map(|_| ())
    }

    async fn edit_media(&self, chat_id: i64, _id: i64, message: &OutgoingMessage) -> ApiResult<()> {
        self.send_text(chat_id, message).await.map(|_| ())
    }

    async fn answer_callback(&self, id: &str, text: Option<&str>) -> ApiResult<()> {
        self.answered
            .lock()
            .push((id.to_owned(), text.map(str::to_owned)));
        Ok(())
    }

    async fn get_me(&self) -> ApiResult<BotIdentity> {
        self.get_me_calls.fetch_add(1, Ordering::SeqCst);
        Ok(BotIdentity {
            id: BOT_ID,
            username: BOT_USERNAME.into(),
        })
    }
}

fn alice() -> User {
    User {
        id: 5,
        first_name: "Alice".into(),
        username: Some("alice".into()),
        ..Default::default()
    }
}

fn private_chat() -> Chat {
    Chat {
        id: 5,
        kind: ChatKind::Private,
    }
}

fn group_chat() -> Chat {
    Chat {
        id: -100,
        kind: ChatKind::Group,
    }
}

fn message(chat: Chat, text: &str) -> Message {
    Message::text(1, chat, text).with_from(alice())
}

fn tap(data: &str, message_id: i64) -> Update {
    let mut origin = Message::text(message_id, private_chat(), "menu");
    origin.from = Some(User {
        id: BOT_ID,
        is_bot: true,
        ..Default::default()
    });
    CallbackQuery {
        id: format!("cb-{message_id}-{data}"),
        from: alice(),
        data: data.into(),
        message: origin,
    }
    .into()
}

fn config() -> CourierConfig {
    let mut config = CourierConfig::default();
    config.bot.token = "123:test-token".into();
    config.pipeline.mention.enabled = true;
    config.pipeline.mention.trim_mention = true;
    config.broadcast.rate_per_sec = 0.0;
    config
}

/// Collects the text and uid claim each handler invocation saw.
#[derive(Clone, Default)]
struct Seen(Arc<Mutex<Vec<(String, Option<i64>)>>>);

impl Seen {
    fn handler(
        &self,
        tag: &'static str,
    ) -> impl Fn(Context, Update) -> futures::future::Ready<Result<(), BoxError>>
    + Clone
    + Send
    + Sync
    + 'static {
        let seen = self.clone();
        move |ctx: Context, update: Update| {
            let text = match &update {
                Update::Message(message) => message.text.clone(),
                Update::CallbackQuery(query) => query.data.clone(),
            };
            seen.0
                .lock()
                .push((format!("{tag}:{text}"), ctx.get_as::<i64>("uid")));
            futures::future::ready(Ok(()))
        }
    }

    fn take(&self) -> Vec<(String, Option<i64>)> {
        std::mem::take(&mut *self.0.lock())
    }
}

#[tokio::test]
async fn test_run_routes_filters_and_injects_claims() {
    let client = Arc::new(RecordingClient::default());
    let seen = Seen::default();
    let app = App::builder(config(), client.clone())
        .bind_command("start", seen.handler("start"))
        .bind_callback("menu", seen.handler("menu"))
        .fallback(seen.handler("fallback"))
        .build()
        .unwrap();

    let mention = format!("@{BOT_USERNAME} hello");
    let updates: Vec<Update> = vec![
        message(private_chat(), "/start").into(),
        // group traffic not addressed to the bot is dropped
        message(group_chat(), "hello everyone").into(),
        message(group_chat(), &mention)
            .with_entity(MessageEntity::new(EntityKind::Mention, 0, BOT_USERNAME.len() + 1))
            .into(),
        tap("menu:[1]", 10),
    ];
    app.run(Context::background(), stream::iter(updates)).await;

    let mut seen = seen.take();
    seen.sort();
    assert_eq!(
        seen,
        vec![
            ("fallback: hello".to_string(), Some(5)),
            ("menu:menu:[1]".to_string(), Some(5)),
            ("start:/start".to_string(), Some(5)),
        ]
    );
    assert_eq!(client.get_me_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_taps_run_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let app = App::builder(config(), Arc::new(RecordingClient::default()))
        .bind_callback("vote", move |_ctx: Context, _update: Update| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<(), BoxError>(())
            }
        })
        .build()
        .unwrap();

    let taps = vec![tap("vote:1", 10), tap("vote:1", 10), tap("vote:1", 11)];
    app.run(Context::background(), stream::iter(taps)).await;

    // one run for message 10, one for message 11
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_panics_are_contained_and_errors_replied() {
    let client = Arc::new(RecordingClient::default());
    let seen = Seen::default();
    let app = App::builder(config(), client.clone())
        .reply_errors()
        .bind_command("boom", |_ctx: Context, _update: Update| async move {
            if true {
                panic!("handler exploded");
            }
            Ok::<(), BoxError>(())
        })
        .bind_command("quota", quota_exceeded)
        .bind_callback("quota", quota_exceeded)
        .bind_command("ok", seen.handler("ok"))
        .build()
        .unwrap();

    let updates: Vec<Update> = vec![
        message(private_chat(), "/boom").into(),
        message(private_chat(), "/quota").into(),
        message(private_chat(), "/ok").into(),
        tap("quota:1", 4),
    ];
    app.run(Context::background(), stream::iter(updates)).await;

    assert_eq!(seen.take(), vec![("ok:/ok".to_string(), Some(5))]);
    assert_eq!(client.sent(), vec![(5, "quota exceeded".to_string())]);
    assert_eq!(
        *client.answered.lock(),
        vec![("cb-4-quota:1".to_string(), Some("quota exceeded".to_string()))]
    );
}

async fn quota_exceeded(_ctx: Context, _update: Update) -> Result<(), BoxError> {
    Err("quota exceeded".into())
}

#[tokio::test]
async fn test_run_stops_on_cancel() {
    let app = App::builder(config(), Arc::new(RecordingClient::default()))
        .build()
        .unwrap();
    let token = CancellationToken::new();
    let (_tx, rx) = mpsc::unbounded::<Update>();

    let stopper = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        stopper.cancel();
    });
    tokio::time::timeout(Duration::from_secs(5), app.run(Context::with_token(token), rx))
        .await
        .expect("run should return once cancelled");
}

#[tokio::test]
async fn test_run_drains_channel() {
    let seen = Seen::default();
    let app = App::builder(config(), Arc::new(RecordingClient::default()))
        .bind_command("ping", seen.handler("ping"))
        .build()
        .unwrap();

    let (tx, rx) = mpsc::unbounded();
    for _ in 0..3 {
        tx.unbounded_send(Update::from(message(private_chat(), "/ping")))
            .unwrap();
    }
    drop(tx);
    app.run(Context::background(), rx).await;
    assert_eq!(seen.take().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_retries_throttled_sends() {
    let client = Arc::new(RecordingClient {
        throttle_once: Mutex::new(HashSet::from([2])),
        ..Default::default()
    });
    let mut config = config();
    config.broadcast.rate_per_sec = 10.0;
    let app = App::builder(config, client.clone()).build().unwrap();

    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = progress.clone();
    let options = BroadcastOptions::new().with_progress(move |p| sink.lock().push(p.index));

    let start = Instant::now();
    let result = app
        .broadcast_with(
            &Context::background(),
            &[1_i64, 2, 3],
            |client: BoxedClient, chat_id: i64| async move {
                client
                    .send_text(chat_id, &OutgoingMessage::text("news"))
                    .await
                    .map(|_| ())
            },
            options,
        )
        .await;

    tokio_test::assert_ok!(result);
    assert_eq!(
        client.sent(),
        vec![
            (1, "news".to_string()),
            (2, "news".to_string()),
            (3, "news".to_string())
        ]
    );
    assert_eq!(*progress.lock(), vec![0, 1, 2, 3]);
    // 100ms pacing before chat 2, then its 2s server wait; chat 3's token
    // refilled meanwhile
    assert_eq!(start.elapsed(), Duration::from_millis(2100));
}

#[tokio::test]
async fn test_broadcast_stop_on_first_error() {
    let client = Arc::new(RecordingClient {
        fail_for: HashSet::from([2]),
        ..Default::default()
    });
    let mut config = config();
    config.broadcast.stop_on_first_error = true;
    let app = App::builder(config, client.clone()).build().unwrap();

    let result = app
        .broadcast(
            &Context::background(),
            &[1_i64, 2, 3],
            |client: BoxedClient, chat_id: i64| async move {
                client
                    .send_text(chat_id, &OutgoingMessage::text("news"))
                    .await
                    .map(|_| ())
            },
        )
        .await;

    assert!(matches!(
        result,
        Err(BroadcastError::Send(ApiError::Platform { code: 403, .. }))
    ));
    assert_eq!(client.sent(), vec![(1, "news".to_string())]);
}

#[tokio::test]
async fn test_bind_routes_table() {
    let seen = Seen::default();
    let handlers = HashMap::from([
        ("Help".to_string(), into_handler(seen.handler("help"))),
        ("ShowPage".to_string(), into_handler(seen.handler("page"))),
    ]);
    let specs = [
        RouteSpec::new("Help").command("help"),
        RouteSpec::new("ShowPage").command("page").callback("page"),
    ];
    let app = App::builder(config(), Arc::new(RecordingClient::default()))
        .bind_routes(specs.clone(), handlers.clone())
        .build()
        .unwrap();
    assert_eq!(app.router().route_count(), 3);

    app.dispatch(Context::background(), tap("page:[2]", 3)).await;
    assert_eq!(seen.take(), vec![("page:page:[2]".to_string(), Some(5))]);

    let duplicate = App::builder(config(), Arc::new(RecordingClient::default()))
        .bind_routes(specs, handlers)
        .bind_command("help", seen.handler("again"))
        .build();
    assert!(matches!(
        duplicate,
        Err(RuntimeError::Route(RouteError::Duplicate { .. }))
    ));
}

#[tokio::test]
async fn test_custom_auth_extractor() {
    let seen = Seen::default();
    let app = App::builder(config(), Arc::new(RecordingClient::default()))
        .auth_extractor(|_ctx: &Context, _update: &Update| {
            Ok::<_, BoxError>(Some(HashMap::from([("uid".to_string(), json!(42))])))
        })
        .bind_command("me", seen.handler("me"))
        .build()
        .unwrap();

    app.dispatch(Context::background(), message(private_chat(), "/me").into())
        .await;
    assert_eq!(seen.take(), vec![("me:/me".to_string(), Some(42))]);
}

#[test]
fn test_tma_auth_uses_bot_token() {
    let app = App::builder(config(), Arc::new(RecordingClient::default()))
        .build()
        .unwrap();
    let auth = app.tma_auth().expect("token configured");

    let claims = TmaClaims::new(unix_now()).with_user(TmaUser {
        id: 5,
        first_name: "Alice".into(),
        ..Default::default()
    });
    let token = auth.generate_token(&claims).unwrap();
    let parsed = auth.parse_token(&token).unwrap();
    assert_eq!(parsed.user.map(|u| u.id), Some(5));

    let mut anonymous = config();
    anonymous.bot.token.clear();
    let app = App::builder(anonymous, Arc::new(RecordingClient::default()))
        .build()
        .unwrap();
    assert!(app.tma_auth().is_none());
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
