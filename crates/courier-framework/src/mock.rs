//! In-memory [`PlatformClient`] for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use courier_core::{ApiError, ApiResult, BotIdentity, OutgoingMessage, PlatformClient};

pub(crate) const BOT_ID: i64 = 1000;
pub(crate) const BOT_USERNAME: &str = "courier_bot";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    SendText { chat_id: i64, text: String },
    SendPhoto { chat_id: i64, text: String },
    EditText { chat_id: i64, message_id: i64, text: String },
    EditCaption { chat_id: i64, message_id: i64, text: String },
    EditMedia { chat_id: i64, message_id: i64, text: String },
    AnswerCallback { id: String, text: Option<String> },
}

#[derive(Default)]
pub(crate) struct MockClient {
    calls: Mutex<Vec<Call>>,
    get_me_calls: AtomicUsize,
    get_me_delay: Duration,
    get_me_fails: bool,
    send_fails: bool,
}

impl MockClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_get_me_delay(mut self, delay: Duration) -> Self {
        self.get_me_delay = delay;
        self
    }

    pub(crate) fn failing_get_me(mut self) -> Self {
        self.get_me_fails = true;
        self
    }

    pub(crate) fn failing_sends(mut self) -> Self {
        self.send_fails = true;
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub(crate) fn get_me_calls(&self) -> usize {
        self.get_me_calls.load(Ordering::SeqCst)
    }

    fn record(&self, call: Call) -> ApiResult<()> {
        self.calls.lock().push(call);
        if self.send_fails {
            return Err(ApiError::Platform {
                code: 400,
                description: "Bad Request: chat not found".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PlatformClient for MockClient {
    async fn send_text(&self, chat_id: i64, message: &OutgoingMessage) -> ApiResult<i64> {
        let text = message.text.clone();
        self.record(Call::SendText { chat_id, text }).map(|()| 1)
    }

    async fn send_photo(&self, chat_id: i64, message: &OutgoingMessage) -> ApiResult<i64> {
        let text = message.text.clone();
        self.record(Call::SendPhoto { chat_id, text }).map(|()| 1)
    }

    async fn edit_text(
        &self,
        chat_id: i64,
        message_id: i64,
        message: &OutgoingMessage,
    ) -> ApiResult<()> {
        let text = message.text.clone();
        self.record(Call::EditText {
            chat_id,
            message_id,
            text,
        })
    }

    async fn edit_caption(
        &self,
        chat_id: i64,
        message_id: i64,
        message: &OutgoingMessage,
    ) -> ApiResult<()> {
        let text = message.text.clone();
        self.record(Call::EditCaption {
            chat_id,
            message_id,
            text,
        })
    }

    async fn edit_media(
        &self,
        chat_id: i64,
        message_id: i64,
        message: &OutgoingMessage,
    ) -> ApiResult<()> {
        let text = message.text.clone();
        self.record(Call::EditMedia {
            chat_id,
            message_id,
            text,
        })
    }

    async fn answer_callback(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> ApiResult<()> {
        self.record(Call::AnswerCallback {
            id: callback_query_id.to_string(),
            text: text.map(str::to_string),
        })
    }

    async fn get_me(&self) -> ApiResult<BotIdentity> {
        self.get_me_calls.fetch_add(1, Ordering::SeqCst);
        if !self.get_me_delay.is_zero() {
            tokio::time::sleep(self.get_me_delay).await;
        }
        if self.get_me_fails {
            return Err(ApiError::Transport("connection reset".into()));
        }
        Ok(BotIdentity {
            id: BOT_ID,
            username: BOT_USERNAME.to_string(),
        })
    }
}
