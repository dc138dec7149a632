//! Callback data encoding.
//!
//! Inline buttons carry a short opaque string. Courier formats it as
//! `route:payload`, where `route` selects the callback handler and `payload`
//! is the button's typed data in a compact JSON form: struct fields are
//! written as an array in declaration order instead of an object, so
//!
//! ```text
//! Page { number: 123, text: "456" }   ──▶   page:[123,"456"]
//! ```
//!
//! The array form is only used when it decodes back into the same value.
//! Types that cannot be read from a sequence (maps, for instance) keep their
//! ordinary JSON encoding.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{CodecError, CodecResult};

/// Separator between the route and the payload.
pub const ROUTE_SEPARATOR: char = ':';

/// Encodes `data` for `route` as `route:payload`.
pub fn marshal_data<T>(route: &str, data: &T) -> CodecResult<String>
where
    T: Serialize + DeserializeOwned,
{
    if route.contains(ROUTE_SEPARATOR) {
        return Err(CodecError::InvalidRoute(route.to_string()));
    }
    let payload_error = |source| CodecError::Payload {
        route: route.to_string(),
        source,
    };

    let value = serde_json::to_value(data).map_err(payload_error)?;
    let payload = compress(&value)
        .into_iter()
        .chain(flatten_top(&value))
        .find(|candidate| decodes_to::<T>(candidate, &value))
        .unwrap_or(value);

    let payload = serde_json::to_string(&payload).map_err(payload_error)?;
    Ok(format!("{route}{ROUTE_SEPARATOR}{payload}"))
}

/// Decodes `route:payload` into the route and its typed payload.
pub fn unmarshal_data<T>(data: &str) -> CodecResult<(String, T)>
where
    T: DeserializeOwned,
{
    let (route, payload) = split_route(data).ok_or(CodecError::InvalidFormat)?;
    let value = serde_json::from_str(payload).map_err(|source| CodecError::Payload {
        route: route.to_string(),
        source,
    })?;
    Ok((route.to_string(), value))
}

/// Splits `route:payload` at the first separator.
pub fn split_route(data: &str) -> Option<(&str, &str)> {
    data.split_once(ROUTE_SEPARATOR)
}

/// Whether `candidate` reads back as a `T` that serializes to `value`.
///
/// Fields that accept any JSON (a `Value`, for instance) read the array form
/// without complaint but with different contents, so decoding alone is not
/// enough.
fn decodes_to<T>(candidate: &Value, value: &Value) -> bool
where
    T: Serialize + DeserializeOwned,
{
    serde_json::from_value::<T>(candidate.clone())
        .and_then(|decoded| serde_json::to_value(&decoded))
        .is_ok_and(|decoded| decoded == *value)
}

/// Rewrites every object, at any depth, as the array of its values.
///
/// Returns `None` when there is nothing to rewrite.
fn compress(value: &Value) -> Option<Value> {
    fn walk(value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Array(map.values().map(walk).collect()),
            Value::Array(items) => Value::Array(items.iter().map(walk).collect()),
            other => other.clone(),
        }
    }
    contains_object(value).then(|| walk(value))
}

/// Rewrites only the outermost object.
fn flatten_top(value: &Value) -> Option<Value> {
    match value {
        Value::Object(map) => Some(Value::Array(map.values().cloned().collect())),
        _ => None,
    }
}

fn contains_object(value: &Value) -> bool {
    match value {
        Value::Object(_) => true,
        Value::Array(items) => items.iter().any(contains_object),
        _ => false,
    }
}
