//! Launch token signatures.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;
use url::form_urlencoded;

use crate::claims::{FIELD_AUTH_DATE, FIELD_HASH};
use crate::error::{TmaError, TmaResult};

type HmacSha256 = Hmac<Sha256>;

/// Key material mixed with the bot token to derive the signing key.
const WEB_APP_DATA: &[u8] = b"WebAppData";

/// Signs and validates launch tokens.
pub trait Signer: Send + Sync {
    /// Returns the signature over `fields` issued at `auth_date` (Unix
    /// seconds). `fields` must not contain `hash` or `auth_date`.
    fn sign(
        &self,
        fields: &BTreeMap<String, String>,
        secret: &str,
        auth_date: i64,
    ) -> TmaResult<String>;

    /// Checks the token's signature and, unless `max_age` is zero, that it
    /// was issued no longer than `max_age` before `now`.
    fn validate_at(
        &self,
        token: &str,
        secret: &str,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> TmaResult<()>;

    fn validate(&self, token: &str, secret: &str, max_age: Duration) -> TmaResult<()> {
        self.validate_at(token, secret, max_age, Utc::now())
    }
}

/// The Telegram mini-app scheme: HMAC-SHA256 over the sorted `key=value`
/// lines, keyed with `HMAC-SHA256("WebAppData", bot_token)`, hex encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacSigner;

impl HmacSigner {
    fn mac(secret: &str) -> TmaResult<HmacSha256> {
        let mut derive =
            HmacSha256::new_from_slice(WEB_APP_DATA).map_err(|_| TmaError::InvalidKey)?;
        derive.update(secret.as_bytes());
        let key = derive.finalize().into_bytes();
        HmacSha256::new_from_slice(&key).map_err(|_| TmaError::InvalidKey)
    }

    fn check_string<'a>(pairs: impl Iterator<Item = (&'a str, &'a str)>) -> String {
        let mut lines: Vec<String> = pairs.map(|(k, v)| format!("{k}={v}")).collect();
        lines.sort_unstable();
        lines.join("\n")
    }
}

impl Signer for HmacSigner {
    fn sign(
        &self,
        fields: &BTreeMap<String, String>,
        secret: &str,
        auth_date: i64,
    ) -> TmaResult<String> {
        let auth_date = auth_date.to_string();
        let pairs = fields
            .iter()
            .filter(|(k, _)| k.as_str() != FIELD_HASH && k.as_str() != FIELD_AUTH_DATE)
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .chain([(FIELD_AUTH_DATE, auth_date.as_str())]);

        let mut mac = Self::mac(secret)?;
        mac.update(Self::check_string(pairs).as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn validate_at(
        &self,
        token: &str,
        secret: &str,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> TmaResult<()> {
        let mut pairs = Vec::new();
        let mut hash = None;
        let mut auth_date = None;
        for (key, value) in form_urlencoded::parse(token.as_bytes()) {
            match key.as_ref() {
                FIELD_HASH => hash = Some(value.into_owned()),
                FIELD_AUTH_DATE => {
                    auth_date = Some(
                        value
                            .parse::<i64>()
                            .map_err(|_| TmaError::AuthDateInvalid(value.to_string()))?,
                    );
                    pairs.push((key.into_owned(), value.into_owned()));
                }
                _ => pairs.push((key.into_owned(), value.into_owned())),
            }
        }

        let hash = hash.filter(|h| !h.is_empty()).ok_or(TmaError::SignMissing)?;
        let auth_date = auth_date.ok_or(TmaError::AuthDateMissing)?;

        if !max_age.is_zero() {
            let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
            if auth_date.saturating_add(max_age) < now.timestamp() {
                debug!(auth_date, "launch token expired");
                return Err(TmaError::Expired);
            }
        }

        let expected = hex::decode(&hash).map_err(|_| TmaError::SignInvalid)?;
        let mut mac = Self::mac(secret)?;
        mac.update(
            Self::check_string(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))).as_bytes(),
        );
        mac.verify_slice(&expected).map_err(|_| TmaError::SignInvalid)
    }
}
