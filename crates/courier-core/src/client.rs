//! The capability surface the pipeline needs from a chat platform.
//!
//! Courier never speaks the wire protocol itself. An adapter implements
//! [`PlatformClient`] on top of whatever HTTP client it likes, and every
//! component that talks to the platform (mention filter, reply helpers,
//! broadcast) goes through this trait.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiResult;

/// The bot's own account, as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotIdentity {
    pub id: i64,
    pub username: String,
}

/// A photo to attach, either uploaded or referenced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Media {
    /// Raw bytes uploaded under `name`.
    Upload { name: String, data: Vec<u8> },
    /// A URL or a platform file id.
    Reference(String),
}

/// Text formatting mode understood by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseMode {
    #[serde(rename = "HTML")]
    Html,
    #[serde(rename = "MarkdownV2")]
    MarkdownV2,
}

/// A message to send or to replace an existing message with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingMessage {
    /// Text, or the caption when `media` is set.
    pub text: String,
    pub media: Option<Media>,
    pub parse_mode: Option<ParseMode>,
    /// Opaque reply markup, passed through to the platform untouched.
    pub reply_markup: Option<Value>,
}

impl OutgoingMessage {
    /// A plain text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Attaches a photo (builder pattern).
    pub fn with_media(mut self, media: Media) -> Self {
        self.media = Some(media);
        self
    }

    /// Sets the parse mode (builder pattern).
    pub fn with_parse_mode(mut self, mode: ParseMode) -> Self {
        self.parse_mode = Some(mode);
        self
    }

    /// Sets the reply markup (builder pattern).
    pub fn with_reply_markup(mut self, markup: Value) -> Self {
        self.reply_markup = Some(markup);
        self
    }
}

/// Platform operations consumed by the pipeline.
///
/// Implementations report throttling as
/// [`ApiError::RateLimited`](crate::ApiError::RateLimited) so that
/// retry helpers can honour the server-specified wait.
#[async_trait]
pub trait PlatformClient: Send + Sync + 'static {
    /// Sends a text message, returning the new message id.
    async fn send_text(&self, chat_id: i64, message: &OutgoingMessage) -> ApiResult<i64>;

    /// Sends a photo with `message.text` as caption, returning the new message id.
    async fn send_photo(&self, chat_id: i64, message: &OutgoingMessage) -> ApiResult<i64>;

    /// Replaces the text of an existing message.
    async fn edit_text(
        &self,
        chat_id: i64,
        message_id: i64,
        message: &OutgoingMessage,
    ) -> ApiResult<()>;

    /// Replaces the caption of an existing photo message.
    async fn edit_caption(
        &self,
        chat_id: i64,
        message_id: i64,
        message: &OutgoingMessage,
    ) -> ApiResult<()>;

    /// Replaces the photo (and caption) of an existing message.
    async fn edit_media(
        &self,
        chat_id: i64,
        message_id: i64,
        message: &OutgoingMessage,
    ) -> ApiResult<()>;

    /// Answers a callback query, optionally showing `text` to the user.
    async fn answer_callback(&self, callback_query_id: &str, text: Option<&str>)
    -> ApiResult<()>;

    /// Fetches the bot's own identity.
    async fn get_me(&self) -> ApiResult<BotIdentity>;
}

/// A shared, type-erased platform client.
pub type BoxedClient = Arc<dyn PlatformClient>;
