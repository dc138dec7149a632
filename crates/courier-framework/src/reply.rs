//! Replying to the update being handled.

use std::fmt;

use async_trait::async_trait;
use tower::BoxError;
use tracing::{error, warn};

use courier_core::{ApiResult, BoxedClient, Context, OutgoingMessage, PlatformClient, Update};

use crate::router::ErrorHandler;

/// Answers `update` with `message`.
///
/// A callback query edits the message carrying the button: its text if it
/// has no photo, its caption if it has one and `message` brings no media,
/// and its media otherwise. A plain message gets a new text or photo message
/// in the same chat.
pub async fn send_message(
    client: &dyn PlatformClient,
    update: &Update,
    message: &OutgoingMessage,
) -> ApiResult<()> {
    match update {
        Update::CallbackQuery(query) => {
            let origin = &query.message;
            let (chat_id, message_id) = (origin.chat.id, origin.message_id);
            if !origin.has_photo {
                client.edit_text(chat_id, message_id, message).await
            } else if message.media.is_none() {
                client.edit_caption(chat_id, message_id, message).await
            } else {
                client.edit_media(chat_id, message_id, message).await
            }
        }
        Update::Message(origin) => {
            if message.media.is_none() {
                client.send_text(origin.chat.id, message).await?;
            } else {
                client.send_photo(origin.chat.id, message).await?;
            }
            Ok(())
        }
    }
}

/// Shows `err` to the user who triggered `update`: as a reply message for a
/// plain message, as a popup for a callback query.
///
/// Best effort. Delivery failures are logged and otherwise ignored.
pub async fn send_error_message(
    client: &dyn PlatformClient,
    update: &Update,
    err: &(dyn fmt::Display + Sync),
) {
    let text = err.to_string();
    let result = match update {
        Update::Message(message) => client
            .send_text(message.chat.id, &OutgoingMessage::text(text))
            .await
            .map(|_| ()),
        Update::CallbackQuery(query) => {
            client
                .answer_callback(&query.id, Some(text.as_str()))
                .await
        }
    };
    if let Err(send_err) = result {
        warn!(
            kind = update.kind(),
            chat_id = update.chat_id(),
            error = %send_err,
            "failed to deliver error message"
        );
    }
}

/// An [`ErrorHandler`] that logs the error and reports it back to the user
/// with [`send_error_message`].
#[derive(Clone)]
pub struct ReplyErrorHandler {
    client: BoxedClient,
}

impl ReplyErrorHandler {
    pub fn new(client: BoxedClient) -> Self {
        Self { client }
    }
}

impl fmt::Debug for ReplyErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyErrorHandler").finish_non_exhaustive()
    }
}

#[async_trait]
impl ErrorHandler for ReplyErrorHandler {
    async fn handle(&self, _ctx: &Context, update: &Update, err: &BoxError) {
        error!(
            kind = update.kind(),
            chat_id = update.chat_id(),
            error = %err,
            "handler failed"
        );
        send_error_message(self.client.as_ref(), update, err).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use courier_core::{CallbackQuery, Chat, Media, Message, User};

    use crate::mock::{Call, MockClient};

    fn chat() -> Chat {
        Chat {
            id: 42,
            ..Default::default()
        }
    }

    fn tap(has_photo: bool) -> Update {
        let mut origin = Message::text(7, chat(), "menu");
        origin.has_photo = has_photo;
        CallbackQuery {
            id: "cb-1".into(),
            from: User::default(),
            data: "menu:1".into(),
            message: origin,
        }
        .into()
    }

    fn photo() -> Media {
        Media::Reference("https://example.com/cat.png".into())
    }

    #[tokio::test]
    async fn test_callback_edits_origin() {
        let client = MockClient::new();
        let text = OutgoingMessage::text("page 2");
        let with_photo = OutgoingMessage::text("page 2").with_media(photo());

        send_message(&client, &tap(false), &text).await.unwrap();
        send_message(&client, &tap(true), &text).await.unwrap();
        send_message(&client, &tap(true), &with_photo).await.unwrap();

        assert_eq!(
            client.calls(),
            vec![
                Call::EditText {
                    chat_id: 42,
                    message_id: 7,
                    text: "page 2".into()
                },
                Call::EditCaption {
                    chat_id: 42,
                    message_id: 7,
                    text: "page 2".into()
                },
                Call::EditMedia {
                    chat_id: 42,
                    message_id: 7,
                    text: "page 2".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_message_sends_new() {
        let client = MockClient::new();
        let update: Update = Message::text(1, chat(), "/start").into();

        send_message(&client, &update, &OutgoingMessage::text("hi")).await.unwrap();
        send_message(&client, &update, &OutgoingMessage::text("cat").with_media(photo()))
            .await
            .unwrap();

        assert_eq!(
            client.calls(),
            vec![
                Call::SendText {
                    chat_id: 42,
                    text: "hi".into()
                },
                Call::SendPhoto {
                    chat_id: 42,
                    text: "cat".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_error_message_per_origin() {
        let client = MockClient::new();
        let update: Update = Message::text(1, chat(), "/start").into();

        send_error_message(&client, &update, &"quota exceeded").await;
        send_error_message(&client, &tap(false), &"quota exceeded").await;

        assert_eq!(
            client.calls(),
            vec![
                Call::SendText {
                    chat_id: 42,
                    text: "quota exceeded".into()
                },
                Call::AnswerCallback {
                    id: "cb-1".into(),
                    text: Some("quota exceeded".into())
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_reply_error_handler_swallows_send_failure() {
        let client = Arc::new(MockClient::new().failing_sends());
        let handler = ReplyErrorHandler::new(client.clone());
        let err: BoxError = "boom".into();

        handler.handle(&Context::background(), &tap(false), &err).await;
        assert_eq!(client.calls().len(), 1);
    }
}
