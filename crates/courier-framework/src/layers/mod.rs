//! Built-in tower layers for the update pipeline.
//!
//! Applied by the application shell in this order, outermost first:
//!
//! | Layer                  | Purpose                                        |
//! |------------------------|------------------------------------------------|
//! | [`RecoveryLayer`]      | turns handler panics into logged no-ops        |
//! | [`MentionFilterLayer`] | drops group messages not addressed to the bot  |
//! | [`DedupLayer`]         | collapses duplicate taps on one inline message |
//! | [`AuthLayer`]          | injects identity claims into the context       |
//!
//! Each converts into a [`Middleware`](crate::Middleware) with
//! [`Middleware::layer`](crate::Middleware::layer).

pub mod auth;
pub mod dedup;
pub mod mention;
pub mod recovery;

pub use auth::{AuthExtractor, AuthLayer, AuthService, CLAIM_SUBJECT, CLAIM_UID, SenderExtractor};
pub use dedup::{DedupLayer, DedupService};
pub use mention::{
    BotIdentityCache, DEFAULT_INFO_EXPIRE, MentionFilterLayer, MentionFilterService,
    addresses_bot, find_mentions, remove_spans,
};
pub use recovery::{RecoveryLayer, RecoveryService};
