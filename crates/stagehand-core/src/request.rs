//! Request and result value objects.

use serde_json::{Map, Value};
use tracing::warn;

use crate::errors::RequestError;
use crate::session::Session;
use crate::status::RequestStatus;

/// How a request (or batch of requests) is being executed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ExecutionType {
    /// Not part of a batch.
    #[default]
    None,
    /// Batch processed immediately, one request after another.
    SerialRealtime,
    /// Batch processed on host render ticks.
    SerialFrame,
    /// Batch processed concurrently on the worker pool.
    Parallel,
}

impl ExecutionType {
    /// Decode the wire value of `executionType`.
    pub fn from_wire(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::SerialRealtime),
            2 => Some(Self::SerialFrame),
            3 => Some(Self::Parallel),
            _ => None,
        }
    }

    /// Wire value of this execution type.
    pub fn to_wire(self) -> i64 {
        match self {
            Self::None => 0,
            Self::SerialRealtime => 1,
            Self::SerialFrame => 2,
            Self::Parallel => 3,
        }
    }

    /// Whether a batch may be run with this execution type.
    pub fn is_batch_mode(self) -> bool {
        self != Self::None
    }

    /// Short label for logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::SerialRealtime => "serial_realtime",
            Self::SerialFrame => "serial_frame",
            Self::Parallel => "parallel",
        }
    }
}

/// One decoded request.
#[derive(Clone, Debug)]
pub struct Request {
    /// Name the dispatcher looks up.
    pub request_type: String,
    /// Request payload. Always an object.
    pub request_data: Map<String, Value>,
    /// Execution context of this request.
    pub execution_type: ExecutionType,
    /// Protocol revision negotiated by the owning session.
    pub rpc_version: u8,
    /// Whether non-fatal parameter checks should be skipped.
    pub ignore_non_fatal_request_checks: bool,
    has_request_data: bool,
    malformed_request_data: bool,
}

impl Request {
    /// Build a request from its raw `requestData`.
    ///
    /// Absent or `null` data becomes an empty object. Data that is present
    /// but not an object also becomes an empty object, and is remembered so
    /// dispatch can reject it.
    pub fn new(
        request_type: impl Into<String>,
        request_data: Option<Value>,
        execution_type: ExecutionType,
    ) -> Self {
        let (request_data, malformed_request_data) = match request_data {
            Some(Value::Object(map)) => (map, false),
            None | Some(Value::Null) => (Map::new(), false),
            Some(_) => (Map::new(), true),
        };
        Self {
            request_type: request_type.into(),
            has_request_data: !request_data.is_empty(),
            request_data,
            execution_type,
            rpc_version: crate::constants::LATEST_RPC_VERSION,
            ignore_non_fatal_request_checks: false,
            malformed_request_data,
        }
    }

    /// Copy the session-level options that affect request handling.
    #[must_use]
    pub fn with_session(mut self, session: &Session) -> Self {
        self.rpc_version = session.rpc_version();
        self.ignore_non_fatal_request_checks = session.ignore_non_fatal_request_checks();
        self
    }

    /// Whether `requestData` holds at least one field.
    pub fn has_request_data(&self) -> bool {
        self.has_request_data
    }

    /// Whether the raw `requestData` was present but not an object.
    pub fn is_request_data_malformed(&self) -> bool {
        self.malformed_request_data
    }

    /// Set a `requestData` field. Used by batch variable substitution.
    pub fn set_field(&mut self, key: impl Into<String>, value: Value) {
        let _ = self.request_data.insert(key.into(), value);
        self.has_request_data = true;
    }

    /// Apply a check that may be waived by the session.
    ///
    /// When the session asked to ignore non-fatal checks, a failing check is
    /// logged and treated as passed.
    pub fn non_fatal(&self, check: Result<(), RequestError>) -> Result<(), RequestError> {
        match check {
            Err(err) if self.ignore_non_fatal_request_checks => {
                warn!(
                    request_type = %self.request_type,
                    comment = %err.comment,
                    "ignoring non-fatal request check"
                );
                Ok(())
            }
            other => other,
        }
    }
}

/// Outcome of one request.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestResult {
    /// Outcome code.
    pub status: RequestStatus,
    /// Response payload; only objects are forwarded to the client.
    pub response_data: Option<Value>,
    /// Explanation, empty on success.
    pub comment: String,
    /// Ticks to pause a frame-driven batch after this request.
    pub sleep_frames: u32,
}

impl RequestResult {
    /// Successful result without data.
    pub fn success() -> Self {
        Self {
            status: RequestStatus::Success,
            response_data: None,
            comment: String::new(),
            sleep_frames: 0,
        }
    }

    /// Successful result carrying `responseData`.
    pub fn success_with_data(data: Value) -> Self {
        Self {
            response_data: Some(data),
            ..Self::success()
        }
    }

    /// Failed result.
    pub fn error(status: RequestStatus, comment: impl Into<String>) -> Self {
        Self {
            status,
            response_data: None,
            comment: comment.into(),
            sleep_frames: 0,
        }
    }

    /// Pause a frame-driven batch for `frames` ticks after this result.
    #[must_use]
    pub fn with_sleep_frames(mut self, frames: u32) -> Self {
        self.sleep_frames = frames;
        self
    }

    /// Whether the request completed as asked.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl From<RequestError> for RequestResult {
    fn from(err: RequestError) -> Self {
        Self::error(err.status, err.comment)
    }
}
