//! Envelope field extraction.
//!
//! Each helper maps a missing or mistyped envelope field to the close code the
//! client is told about.

use serde_json::{Map, Value};
use stagehand_core::{ProtocolError, Session};

/// A field that must be a string.
pub fn required_str<'a>(object: &'a Map<String, Value>, key: &str) -> Result<&'a str, ProtocolError> {
    match object.get(key) {
        None | Some(Value::Null) => Err(ProtocolError::missing_key(key)),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ProtocolError::invalid_key_type(key, "a string")),
    }
}

/// A field that must be an unsigned integer.
pub fn required_u64(object: &Map<String, Value>, key: &str) -> Result<u64, ProtocolError> {
    match object.get(key) {
        None | Some(Value::Null) => Err(ProtocolError::missing_key(key)),
        Some(value) => value
            .as_u64()
            .ok_or_else(|| ProtocolError::invalid_key_type(key, "an unsigned integer")),
    }
}

/// A field that must be an array.
pub fn required_array<'a>(
    object: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a Vec<Value>, ProtocolError> {
    match object.get(key) {
        None | Some(Value::Null) => Err(ProtocolError::missing_key(key)),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(ProtocolError::invalid_key_type(key, "an array")),
    }
}

/// A boolean field that may be absent.
pub fn optional_bool(object: &Map<String, Value>, key: &str) -> Result<Option<bool>, ProtocolError> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(ProtocolError::invalid_key_type(key, "a boolean")),
    }
}

/// An unsigned integer field that may be absent.
pub fn optional_u64(object: &Map<String, Value>, key: &str) -> Result<Option<u64>, ProtocolError> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| ProtocolError::invalid_key_type(key, "an unsigned integer")),
    }
}

/// An integer field that may be absent.
pub fn optional_i64(object: &Map<String, Value>, key: &str) -> Result<Option<i64>, ProtocolError> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .ok_or_else(|| ProtocolError::invalid_key_type(key, "an integer")),
    }
}

/// Session options carried by `Identify` and `Reidentify`.
///
/// Parsed in full before anything is applied, so a bad field leaves the
/// session untouched.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SessionParameters {
    /// `ignoreInvalidMessages`
    pub ignore_invalid_messages: Option<bool>,
    /// `ignoreNonFatalRequestChecks`
    pub ignore_non_fatal_request_checks: Option<bool>,
    /// `eventSubscriptions`
    pub event_subscriptions: Option<u64>,
}

impl SessionParameters {
    /// Read the optional session fields.
    pub fn parse(object: &Map<String, Value>) -> Result<Self, ProtocolError> {
        Ok(Self {
            ignore_invalid_messages: optional_bool(object, "ignoreInvalidMessages")?,
            ignore_non_fatal_request_checks: optional_bool(object, "ignoreNonFatalRequestChecks")?,
            event_subscriptions: optional_u64(object, "eventSubscriptions")?,
        })
    }

    /// Apply the fields that were present. Returns the previous and the
    /// current subscription mask.
    pub fn apply(&self, session: &Session) -> (u64, u64) {
        if let Some(ignore) = self.ignore_invalid_messages {
            session.set_ignore_invalid_messages(ignore);
        }
        if let Some(ignore) = self.ignore_non_fatal_request_checks {
            session.set_ignore_non_fatal_request_checks(ignore);
        }
        let previous = session.event_subscriptions();
        if let Some(mask) = self.event_subscriptions {
            let _ = session.set_event_subscriptions(mask);
        }
        (previous, session.event_subscriptions())
    }
}
