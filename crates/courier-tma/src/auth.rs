use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use url::form_urlencoded;

use crate::claims::{FIELD_AUTH_DATE, FIELD_HASH, TmaClaims};
use crate::error::TmaResult;
use crate::signer::{HmacSigner, Signer};

/// Scheme name of an `Authorization` header carrying a launch token.
pub const AUTHORIZATION_PREFIX: &str = "tma";

/// Extracts the token from an `Authorization: tma <token>` header value.
pub fn strip_authorization(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case(AUTHORIZATION_PREFIX) && !token.is_empty()).then_some(token)
}

/// Issues and verifies mini-app launch tokens for one bot.
pub struct TmaAuth<S = HmacSigner> {
    bot_token: String,
    max_age: Duration,
    signer: S,
}

impl TmaAuth {
    /// A codec signing with `bot_token`. Tokens older than `max_age` are
    /// rejected; a zero `max_age` accepts tokens of any age.
    pub fn new(bot_token: impl Into<String>, max_age: Duration) -> Self {
        Self::with_signer(bot_token, max_age, HmacSigner)
    }
}

impl<S: Signer> TmaAuth<S> {
    pub fn with_signer(bot_token: impl Into<String>, max_age: Duration, signer: S) -> Self {
        Self {
            bot_token: bot_token.into(),
            max_age,
            signer,
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Validates `token` and decodes its claims.
    pub fn parse_token(&self, token: &str) -> TmaResult<TmaClaims> {
        self.parse_token_at(token, Utc::now())
    }

    /// [`parse_token`](Self::parse_token) with an explicit current time.
    pub fn parse_token_at(&self, token: &str, now: DateTime<Utc>) -> TmaResult<TmaClaims> {
        self.signer
            .validate_at(token, &self.bot_token, self.max_age, now)?;
        TmaClaims::parse(token)
    }

    /// Signs `claims` as issued at `claims.auth_date` and encodes them as a
    /// URL query. Any `hash` already on `claims` is replaced.
    pub fn generate_token(&self, claims: &TmaClaims) -> TmaResult<String> {
        let fields = claims.fields()?;
        let hash = self
            .signer
            .sign(&fields, &self.bot_token, claims.auth_date)?;

        Ok(form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&fields)
            .append_pair(FIELD_AUTH_DATE, &claims.auth_date.to_string())
            .append_pair(FIELD_HASH, &hash)
            .finish())
    }
}

impl<S> fmt::Debug for TmaAuth<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TmaAuth")
            .field("bot_token", &"<redacted>")
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}
