//! Inbound update model.
//!
//! # Hierarchy
//!
//! ```text
//! Update
//! ├── Message       { message_id, chat, from, text, entities, caption, ... }
//! └── CallbackQuery { id, from, data, message }
//!                                      └── Message (the one carrying the button)
//! ```
//!
//! Field names follow the platform's JSON so updates can be deserialized
//! straight from a webhook body or a polling response.

use serde::{Deserialize, Serialize};

// ============================================================================
// Shared Types
// ============================================================================

/// A platform user or bot account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// The kind of conversation a message belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    #[default]
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    /// Group-like chats are the ones where the bot must be addressed explicitly.
    pub fn is_group(self) -> bool {
        matches!(self, Self::Group | Self::Supergroup | Self::Channel)
    }
}

/// A conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub kind: ChatKind,
}

/// The kind of a marked span inside message text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// `@username`
    Mention,
    /// A reference to a user without a username, carrying the user itself.
    TextMention,
    /// `/command` or `/command@botname`
    BotCommand,
    /// Formatting and link entities the pipeline does not interpret.
    #[serde(other)]
    Other,
}

/// A marked span inside a text or caption.
///
/// `offset` and `length` are byte positions in the original string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub offset: usize,
    pub length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

impl MessageEntity {
    pub fn new(kind: EntityKind, offset: usize, length: usize) -> Self {
        Self {
            kind,
            offset,
            length,
            user: None,
        }
    }

    /// A `text_mention` entity pointing at `user`.
    pub fn text_mention(offset: usize, length: usize, user: User) -> Self {
        Self {
            kind: EntityKind::TextMention,
            offset,
            length,
            user: Some(user),
        }
    }

    /// Returns the slice of `text` this entity covers.
    ///
    /// `None` when the span is out of range or splits a UTF-8 character.
    pub fn slice<'a>(&self, text: &'a str) -> Option<&'a str> {
        text.get(self.offset..self.offset.checked_add(self.length)?)
    }
}

// ============================================================================
// Message
// ============================================================================

/// A message in a chat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<User>,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<MessageEntity>,
    #[serde(default)]
    pub caption: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caption_entities: Vec<MessageEntity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message: Option<Box<Message>>,
    /// Whether the message carries a photo. Decides how replies edit it.
    #[serde(default)]
    pub has_photo: bool,
}

impl Message {
    /// Creates a text message in `chat`.
    pub fn text(message_id: i64, chat: Chat, text: impl Into<String>) -> Self {
        Self {
            message_id,
            chat,
            text: text.into(),
            ..Default::default()
        }
    }

    /// Sets the sender (builder pattern).
    pub fn with_from(mut self, from: User) -> Self {
        self.from = Some(from);
        self
    }

    /// Adds a text entity (builder pattern).
    pub fn with_entity(mut self, entity: MessageEntity) -> Self {
        self.entities.push(entity);
        self
    }
}

// ============================================================================
// CallbackQuery
// ============================================================================

/// A press on an inline button.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    /// Opaque button data, conventionally `route:payload`.
    #[serde(default)]
    pub data: String,
    /// The message the button was attached to.
    pub message: Message,
}

// ============================================================================
// Update
// ============================================================================

/// One inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Update {
    Message(Message),
    CallbackQuery(CallbackQuery),
}

impl Update {
    /// Short name used in logs and spans.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::CallbackQuery(_) => "callback_query",
        }
    }

    /// The chat the update belongs to.
    pub fn chat_id(&self) -> i64 {
        match self {
            Self::Message(m) => m.chat.id,
            Self::CallbackQuery(q) => q.message.chat.id,
        }
    }

    /// The user who triggered the update, if known.
    pub fn sender(&self) -> Option<&User> {
        match self {
            Self::Message(m) => m.from.as_ref(),
            Self::CallbackQuery(q) => Some(&q.from),
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Self::Message(m) => Some(m),
            Self::CallbackQuery(_) => None,
        }
    }

    pub fn as_message_mut(&mut self) -> Option<&mut Message> {
        match self {
            Self::Message(m) => Some(m),
            Self::CallbackQuery(_) => None,
        }
    }

    pub fn as_callback_query(&self) -> Option<&CallbackQuery> {
        match self {
            Self::CallbackQuery(q) => Some(q),
            Self::Message(_) => None,
        }
    }
}

impl From<Message> for Update {
    fn from(message: Message) -> Self {
        Self::Message(message)
    }
}

impl From<CallbackQuery> for Update {
    fn from(query: CallbackQuery) -> Self {
        Self::CallbackQuery(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_message_update() {
        let raw = json!({
            "message": {
                "message_id": 10,
                "chat": { "id": -100, "type": "supergroup" },
                "from": { "id": 5, "first_name": "Ann", "username": "ann" },
                "text": "@bot hi",
                "entities": [{ "type": "mention", "offset": 0, "length": 4 }]
            }
        });
        let update: Update = serde_json::from_value(raw).unwrap();
        let msg = update.as_message().unwrap();
        assert_eq!(msg.chat.kind, ChatKind::Supergroup);
        assert_eq!(msg.entities[0].kind, EntityKind::Mention);
        assert_eq!(update.sender().unwrap().username.as_deref(), Some("ann"));
        assert_eq!(update.chat_id(), -100);
    }

    #[test]
    fn test_unknown_entity_kind_is_other() {
        let entity: MessageEntity =
            serde_json::from_value(json!({ "type": "bold", "offset": 0, "length": 1 })).unwrap();
        assert_eq!(entity.kind, EntityKind::Other);
    }

    #[test]
    fn test_entity_slice_bounds() {
        let entity = MessageEntity::new(EntityKind::Mention, 0, 4);
        assert_eq!(entity.slice("@bot hello"), Some("@bot"));
        assert_eq!(entity.slice("@b"), None);
        // splits the two-byte 'é'
        let entity = MessageEntity::new(EntityKind::Mention, 0, 1);
        assert_eq!(entity.slice("é"), None);
    }

    #[test]
    fn test_chat_kind_is_group() {
        assert!(!ChatKind::Private.is_group());
        assert!(ChatKind::Group.is_group());
        assert!(ChatKind::Supergroup.is_group());
        assert!(ChatKind::Channel.is_group());
    }
}
