//! Wire envelopes.
//!
//! Client messages are decoded field by field by the protocol layer, because
//! each malformed field maps to its own close code. Server messages are
//! plain `Serialize` types tagged by `messageType`.

use serde::Serialize;
use serde_json::Value;

use crate::request::RequestResult;
use crate::status::RequestStatus;

/// Message types a client may send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientMessageType {
    /// First message of the handshake.
    Identify,
    /// Update session parameters after identifying.
    Reidentify,
    /// A single request.
    Request,
    /// An ordered list of requests.
    RequestBatch,
}

impl ClientMessageType {
    /// Decode a `messageType` string.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "Identify" => Some(Self::Identify),
            "Reidentify" => Some(Self::Reidentify),
            "Request" => Some(Self::Request),
            "RequestBatch" => Some(Self::RequestBatch),
            _ => None,
        }
    }

    /// The `messageType` string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Identify => "Identify",
            Self::Reidentify => "Reidentify",
            Self::Request => "Request",
            Self::RequestBatch => "RequestBatch",
        }
    }
}

/// Authentication parameters announced in `Hello`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuthenticationChallenge {
    /// Per-connection challenge.
    pub challenge: String,
    /// Server salt.
    pub salt: String,
}

/// Messages sent by the server.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "messageType", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Greeting sent right after the connection is accepted.
    Hello {
        /// Server version string.
        server_version: String,
        /// Newest protocol revision the server speaks.
        rpc_version: u8,
        /// Present when the client must authenticate.
        #[serde(skip_serializing_if = "Option::is_none")]
        authentication: Option<AuthenticationChallenge>,
    },
    /// Reply to `Identify` and `Reidentify`.
    Identified {
        /// Protocol revision in effect for the session.
        negotiated_rpc_version: u8,
    },
    /// Broadcast event.
    Event {
        /// Event name.
        event_type: String,
        /// Subscription bits the event belongs to.
        event_intent: u64,
        /// Event payload.
        #[serde(skip_serializing_if = "Option::is_none")]
        event_data: Option<Value>,
    },
    /// Reply to `Request`.
    RequestResponse(RequestResponse),
    /// Reply to `RequestBatch`.
    RequestBatchResponse {
        /// Echo of the batch `requestId`.
        request_id: String,
        /// One entry per executed request.
        results: Vec<RequestResponse>,
    },
}

impl ServerMessage {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Status block of a request response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RequestStatusBody {
    /// Whether the request succeeded.
    pub result: bool,
    /// Numeric status code.
    pub code: RequestStatus,
    /// Explanation, omitted when empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Response to one request, standalone or inside a batch.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    /// Echo of `requestType`.
    pub request_type: String,
    /// Echo of `requestId` when one was supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
    /// Outcome.
    pub request_status: RequestStatusBody,
    /// Response payload when the handler produced an object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_data: Option<Value>,
}

impl RequestResponse {
    /// Shape a [`RequestResult`] for the wire.
    ///
    /// `requestId` is echoed only if present and non-null, `responseData`
    /// only if it is an object, and `comment` only if non-empty.
    pub fn from_result(
        request_type: impl Into<String>,
        request_id: Option<Value>,
        result: RequestResult,
    ) -> Self {
        Self {
            request_type: request_type.into(),
            request_id: request_id.filter(|id| !id.is_null()),
            request_status: RequestStatusBody {
                result: result.status.is_success(),
                code: result.status,
                comment: Some(result.comment).filter(|c| !c.is_empty()),
            },
            response_data: result.response_data.filter(Value::is_object),
        }
    }

    /// Whether the request succeeded.
    pub fn is_success(&self) -> bool {
        self.request_status.result
    }
}
