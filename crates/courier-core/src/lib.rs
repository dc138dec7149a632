//! # Courier Core
//!
//! Fundamental types shared by every Courier crate:
//!
//! - **Update model**: [`Update`], [`Message`], [`CallbackQuery`] and the
//!   text entities the mention filter scans ([`MessageEntity`])
//! - **Execution context**: [`Context`], a cancellable, deadline-aware
//!   context with read-through key/value overlays
//! - **Platform capability**: the [`PlatformClient`] trait adapters implement
//! - **Callback data codec**: [`marshal_data`] / [`unmarshal_data`] for the
//!   `route:payload` button format
//! - **Errors**: [`ApiError`], [`CodecError`], [`ContextError`]

pub mod client;
pub mod codec;
pub mod context;
pub mod error;
pub mod update;

pub use client::{BotIdentity, BoxedClient, Media, OutgoingMessage, ParseMode, PlatformClient};
pub use codec::{marshal_data, split_route, unmarshal_data};
pub use context::{Context, Values};
pub use error::{ApiError, ApiResult, CodecError, CodecResult, ContextError};
pub use update::{
    CallbackQuery, Chat, ChatKind, EntityKind, Message, MessageEntity, Update, User,
};

/// Prelude for common imports.
pub mod prelude {
    pub use super::client::{OutgoingMessage, PlatformClient};
    pub use super::context::Context;
    pub use super::error::{ApiError, ApiResult};
    pub use super::update::{CallbackQuery, Message, Update};
}
