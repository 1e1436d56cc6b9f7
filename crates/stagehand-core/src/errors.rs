//! Error types for the two failure tiers.
//!
//! A [`ProtocolError`] ends the connection with a close frame. A
//! [`RequestError`] only fails one request and is reported back inside its
//! result.

use crate::close_code::CloseCode;
use crate::status::RequestStatus;

/// Connection-fatal protocol violation.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{close_code}: {reason}")]
pub struct ProtocolError {
    /// Close code sent to the client.
    pub close_code: CloseCode,
    /// Human-readable close reason.
    pub reason: String,
}

impl ProtocolError {
    /// Create a protocol error.
    pub fn new(close_code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            close_code,
            reason: reason.into(),
        }
    }

    /// A required envelope key is absent.
    pub fn missing_key(key: &str) -> Self {
        Self::new(
            CloseCode::MissingDataKey,
            format!("Your payload is missing the `{key}` field."),
        )
    }

    /// An envelope key holds the wrong JSON type.
    pub fn invalid_key_type(key: &str, expected: &str) -> Self {
        Self::new(
            CloseCode::InvalidDataKeyType,
            format!("Your `{key}` is not {expected}."),
        )
    }
}

/// Request-level failure returned by handlers and validators.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{comment}")]
pub struct RequestError {
    /// Status code reported to the client.
    pub status: RequestStatus,
    /// Explanation reported to the client.
    pub comment: String,
}

impl RequestError {
    /// Create a request error.
    pub fn new(status: RequestStatus, comment: impl Into<String>) -> Self {
        Self {
            status,
            comment: comment.into(),
        }
    }

    /// The field is missing from `requestData`.
    pub fn missing_field(key: &str) -> Self {
        Self::new(
            RequestStatus::MissingRequestField,
            format!("Your request is missing the `{key}` field."),
        )
    }

    /// The field has the wrong JSON type.
    pub fn invalid_type(key: &str, expected: &str) -> Self {
        Self::new(
            RequestStatus::InvalidRequestFieldType,
            format!("The field value of `{key}` must be {expected}."),
        )
    }

    /// The field is empty but must not be.
    pub fn empty(key: &str) -> Self {
        Self::new(
            RequestStatus::RequestFieldEmpty,
            format!("The field value of `{key}` must not be empty."),
        )
    }

    /// The numeric field is outside the permitted range.
    pub fn out_of_range(key: &str, detail: impl std::fmt::Display) -> Self {
        Self::new(
            RequestStatus::RequestFieldOutOfRange,
            format!("The field value of `{key}` {detail}."),
        )
    }
}
