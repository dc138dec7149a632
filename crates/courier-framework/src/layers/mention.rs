//! Group-chat addressing filter.
//!
//! In groups, supergroups and channels a bot sees every message, most of
//! which are not meant for it. [`MentionFilterLayer`] lets a message through
//! only when it addresses the bot:
//!
//! 1. it replies to a message the bot sent, or
//! 2. its text (or, failing that, its caption) carries an entity naming the
//!    bot: `@username`, a `text_mention` of the bot's id, or a
//!    `/command@username`.
//!
//! Anything else is dropped silently. Private chats and callback queries are
//! never filtered and never trigger an identity lookup.
//!
//! With `trim_mention` enabled the matched spans are cut out before the
//! handler sees the message, so `"@bot hello"` arrives as `" hello"` and
//! `"/start@bot now"` as `"/start now"`.

use std::ops::Range;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio::time::Instant;
use tower::{BoxError, Layer, Service};
use tracing::{debug, error, trace};

use courier_core::{
    ApiError, BotIdentity, BoxedClient, Context, EntityKind, Message, MessageEntity,
};

use crate::error::IdentityError;
use crate::handler::Request;
use crate::singleflight::SingleFlight;

/// How long a fetched identity stays fresh unless configured otherwise.
pub const DEFAULT_INFO_EXPIRE: Duration = Duration::from_secs(60 * 60);

// ============================================================================
// Identity cache
// ============================================================================

type Entry = Arc<RwLock<Option<(BotIdentity, Instant)>>>;

/// The bot's own identity, fetched lazily and kept for `ttl`.
///
/// Expiry is checked on access; there is no background refresh. Concurrent
/// callers that find the entry stale share a single `get_me` call. A failed
/// fetch is returned to every waiting caller and nothing is cached.
#[derive(Clone)]
pub struct BotIdentityCache {
    client: BoxedClient,
    ttl: Duration,
    entry: Entry,
    refresh: Arc<SingleFlight<(), Result<BotIdentity, ApiError>>>,
}

impl BotIdentityCache {
    pub fn new(client: BoxedClient, ttl: Duration) -> Self {
        Self {
            client,
            ttl,
            entry: Arc::new(RwLock::new(None)),
            refresh: Arc::new(SingleFlight::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached identity if it is still fresh.
    pub fn cached(&self) -> Option<BotIdentity> {
        fresh(&self.entry, self.ttl)
    }

    /// Returns the identity, refreshing it first if it is missing or stale.
    pub async fn get(&self, ctx: &Context) -> Result<BotIdentity, IdentityError> {
        if let Some(identity) = self.cached() {
            return Ok(identity);
        }

        let client = Arc::clone(&self.client);
        let entry = Arc::clone(&self.entry);
        let ttl = self.ttl;
        let identity = self
            .refresh
            .run(ctx, (), move || async move {
                // another refresh may have landed between the check above
                // and this call becoming the leader
                if let Some(identity) = fresh(&entry, ttl) {
                    return Ok(identity);
                }
                let identity = client.get_me().await?;
                debug!(id = identity.id, username = %identity.username, "refreshed bot identity");
                *entry.write() = Some((identity.clone(), Instant::now()));
                Ok(identity)
            })
            .await??;
        Ok(identity)
    }

    /// Drops the cached identity so the next access refetches it.
    pub fn invalidate(&self) {
        *self.entry.write() = None;
    }
}

fn fresh(entry: &Entry, ttl: Duration) -> Option<BotIdentity> {
    match &*entry.read() {
        Some((identity, fetched_at)) if fetched_at.elapsed() < ttl => Some(identity.clone()),
        _ => None,
    }
}

impl std::fmt::Debug for BotIdentityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotIdentityCache")
            .field("ttl", &self.ttl)
            .field("cached", &self.cached())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Scanning
// ============================================================================

/// Returns the byte ranges of `text` that address `bot`.
///
/// Each range is what trimming would remove: the whole entity for
/// `mention` and `text_mention`, only the `@username` suffix for
/// `bot_command`. An empty result means the text does not address the bot.
/// Entities whose span falls outside `text` or splits a character are
/// ignored.
pub fn find_mentions(text: &str, entities: &[MessageEntity], bot: &BotIdentity) -> Vec<Range<usize>> {
    let handle = format!("@{}", bot.username);
    let mut spans = Vec::new();

    for entity in entities {
        let Some(slice) = entity.slice(text) else {
            trace!(?entity, "entity outside text, skipped");
            continue;
        };
        let start = entity.offset;
        let end = entity.offset + entity.length;

        match entity.kind {
            EntityKind::Mention if slice == handle => spans.push(start..end),
            EntityKind::TextMention
                if entity.user.as_ref().is_some_and(|user| user.id == bot.id) =>
            {
                spans.push(start..end)
            }
            EntityKind::BotCommand if slice.ends_with(&handle) => {
                spans.push(end - handle.len()..end)
            }
            _ => {}
        }
    }
    spans
}

/// Removes `spans` from `text` in one pass.
///
/// Spans are offsets into the original string. They are applied from the
/// rightmost down so earlier offsets stay valid; a span overlapping one
/// already removed is skipped.
pub fn remove_spans(text: &mut String, mut spans: Vec<Range<usize>>) {
    spans.sort_by(|a, b| b.start.cmp(&a.start));
    let mut floor = text.len();
    for span in spans {
        if span.end > floor {
            continue;
        }
        text.replace_range(span.clone(), "");
        floor = span.start;
    }
}

/// Decides whether `message` addresses `bot`, trimming the mention from the
/// field it was found in when `trim` is set.
pub fn addresses_bot(message: &mut Message, bot: &BotIdentity, trim: bool) -> bool {
    let replied_to_bot = message
        .reply_to_message
        .as_ref()
        .and_then(|reply| reply.from.as_ref())
        .is_some_and(|from| from.id == bot.id);
    if replied_to_bot {
        return true;
    }

    let spans = find_mentions(&message.text, &message.entities, bot);
    if !spans.is_empty() {
        if trim {
            remove_spans(&mut message.text, spans);
        }
        return true;
    }

    let spans = find_mentions(&message.caption, &message.caption_entities, bot);
    if !spans.is_empty() {
        if trim {
            remove_spans(&mut message.caption, spans);
        }
        return true;
    }

    false
}

// ============================================================================
// Layer
// ============================================================================

/// A tower [`Layer`] that drops group messages not addressed to the bot.
#[derive(Debug, Clone)]
pub struct MentionFilterLayer {
    cache: BotIdentityCache,
    trim_mention: bool,
}

impl MentionFilterLayer {
    /// Creates a filter with its own identity cache.
    pub fn new(client: BoxedClient, info_expire: Duration) -> Self {
        Self::with_cache(BotIdentityCache::new(client, info_expire))
    }

    /// Creates a filter over an existing identity cache.
    pub fn with_cache(cache: BotIdentityCache) -> Self {
        Self {
            cache,
            trim_mention: false,
        }
    }

    /// Cut matched mentions out of the text (default: `false`).
    pub fn trim_mention(mut self, enabled: bool) -> Self {
        self.trim_mention = enabled;
        self
    }

    pub fn cache(&self) -> &BotIdentityCache {
        &self.cache
    }
}

impl<S> Layer<S> for MentionFilterLayer {
    type Service = MentionFilterService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MentionFilterService {
            cache: self.cache.clone(),
            trim_mention: self.trim_mention,
            inner,
        }
    }
}

/// The [`Service`] produced by [`MentionFilterLayer`].
#[derive(Debug, Clone)]
pub struct MentionFilterService<S> {
    cache: BotIdentityCache,
    trim_mention: bool,
    inner: S,
}

impl<S> Service<Request> for MentionFilterService<S>
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
        let in_group = request
            .update
            .as_message()
            .is_some_and(|message| message.chat.kind.is_group());
        if !in_group {
            return self.inner.call(request).boxed();
        }

        let cache = self.cache.clone();
        let trim = self.trim_mention;
        let mut inner = self.inner.clone();

        async move {
            let Request { ctx, mut update } = request;
            let bot = cache.get(&ctx).await.map_err(|err| {
                error!(error = %err, "failed to resolve bot identity");
                err
            })?;

            let addressed = update
                .as_message_mut()
                .is_some_and(|message| addresses_bot(message, &bot, trim));
            if !addressed {
                trace!(chat_id = update.chat_id(), "group message not addressed to bot");
                return Ok(());
            }
            inner.call(Request::new(ctx, update)).await
        }
        .boxed()
    }
}
