//! The identity carried by a mini-app launch token.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::error::{TmaError, TmaResult};

pub const FIELD_HASH: &str = "hash";
pub const FIELD_AUTH_DATE: &str = "auth_date";

fn is_false(value: &bool) -> bool {
    !*value
}

/// A user as described inside a launch token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmaUser {
    pub id: i64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_bot: bool,
    pub first_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub language_code: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_premium: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub added_to_attachment_menu: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub allows_write_to_pm: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub photo_url: String,
}

/// The chat a mini app was opened from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmaChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub photo_url: String,
}

/// Claims decoded from a launch token.
///
/// Absent optional fields are omitted when the claims are signed. Fields this
/// type does not know are kept in `extra` so they survive a round trip and
/// still count towards the signature.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TmaClaims {
    pub query_id: Option<String>,
    pub user: Option<TmaUser>,
    pub receiver: Option<TmaUser>,
    pub chat: Option<TmaChat>,
    pub chat_type: Option<String>,
    pub chat_instance: Option<i64>,
    pub start_param: Option<String>,
    pub can_send_after: Option<i64>,
    /// Unix seconds at which the token was issued.
    pub auth_date: i64,
    /// Hex signature; empty on claims that were never signed.
    pub hash: String,
    pub extra: BTreeMap<String, String>,
}

impl TmaClaims {
    pub fn new(auth_date: i64) -> Self {
        Self {
            auth_date,
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user: TmaUser) -> Self {
        self.user = Some(user);
        self
    }

    /// Issue time, or `None` if `auth_date` is out of range.
    pub fn auth_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.auth_date, 0)
    }

    /// The signed field set: every present field except `hash` and
    /// `auth_date`, as the string that goes on the wire.
    pub fn fields(&self) -> TmaResult<BTreeMap<String, String>> {
        let mut fields = self.extra.clone();
        fields.remove(FIELD_HASH);
        fields.remove(FIELD_AUTH_DATE);

        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                fields.insert(key.to_owned(), value);
            }
        };
        put("query_id", self.query_id.clone());
        put("user", to_json("user", self.user.as_ref())?);
        put("receiver", to_json("receiver", self.receiver.as_ref())?);
        put("chat", to_json("chat", self.chat.as_ref())?);
        put("chat_type", self.chat_type.clone());
        put("chat_instance", self.chat_instance.map(|n| n.to_string()));
        put("start_param", self.start_param.clone());
        put("can_send_after", self.can_send_after.map(|n| n.to_string()));
        Ok(fields)
    }

    /// Decodes claims from a URL-query-encoded token without checking its
    /// signature.
    pub fn parse(token: &str) -> TmaResult<Self> {
        let mut claims = Self::default();
        let mut auth_date = None;

        for (key, value) in form_urlencoded::parse(token.as_bytes()) {
            let value = value.into_owned();
            match key.as_ref() {
                FIELD_HASH => claims.hash = value,
                FIELD_AUTH_DATE => {
                    auth_date = Some(
                        value
                            .parse()
                            .map_err(|_| TmaError::AuthDateInvalid(value.clone()))?,
                    )
                }
                "query_id" => claims.query_id = Some(value),
                "user" => claims.user = Some(from_json("user", &value)?),
                "receiver" => claims.receiver = Some(from_json("receiver", &value)?),
                "chat" => claims.chat = Some(from_json("chat", &value)?),
                "chat_type" => claims.chat_type = Some(value),
                "chat_instance" => {
                    claims.chat_instance = Some(parse_number("chat_instance", value)?)
                }
                "start_param" => claims.start_param = Some(value),
                "can_send_after" => {
                    claims.can_send_after = Some(parse_number("can_send_after", value)?)
                }
                other => {
                    claims.extra.insert(other.to_owned(), value);
                }
            }
        }

        claims.auth_date = auth_date.ok_or(TmaError::AuthDateMissing)?;
        Ok(claims)
    }
}

fn to_json<T: Serialize>(field: &str, value: Option<&T>) -> TmaResult<Option<String>> {
    value
        .map(serde_json::to_string)
        .transpose()
        .map_err(|source| TmaError::InvalidJson {
            field: field.to_owned(),
            source,
        })
}

fn from_json<T: for<'de> Deserialize<'de>>(field: &str, raw: &str) -> TmaResult<T> {
    serde_json::from_str(raw).map_err(|source| TmaError::InvalidJson {
        field: field.to_owned(),
        source,
    })
}

fn parse_number(field: &str, value: String) -> TmaResult<i64> {
    value.parse().map_err(|_| TmaError::InvalidNumber {
        field: field.to_owned(),
        value,
    })
}
