//! # Courier TMA
//!
//! Launch tokens for Telegram mini apps: the URL-query-encoded init data a
//! mini app hands to its backend, signed with the bot token.
//!
//! ```
//! use std::time::Duration;
//! use courier_tma::{TmaAuth, TmaClaims};
//!
//! let auth = TmaAuth::new("123:bot-token", Duration::from_secs(3600));
//! let claims = TmaClaims::new(chrono::Utc::now().timestamp());
//! let token = auth.generate_token(&claims).unwrap();
//! assert_eq!(auth.parse_token(&token).unwrap().auth_date, claims.auth_date);
//! ```

pub mod auth;
pub mod claims;
pub mod error;
pub mod signer;

pub use auth::{AUTHORIZATION_PREFIX, TmaAuth, strip_authorization};
pub use claims::{TmaChat, TmaClaims, TmaUser};
pub use error::{TmaError, TmaResult};
pub use signer::{HmacSigner, Signer};
