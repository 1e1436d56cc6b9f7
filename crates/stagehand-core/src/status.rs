//! Request status taxonomy.
//!
//! Codes are grouped by hundreds: `1xx` success, `2xx` envelope problems,
//! `3xx` missing fields, `4xx` bad field values, `5xx` output/studio state,
//! `6xx` resource lookups, `7xx` processing failures.

use serde::{Serialize, Serializer};

/// Outcome code attached to every request result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RequestStatus {
    /// Unknown status, should never be returned.
    Unknown = 0,
    /// For internal use to signify a successful field check.
    NoError = 10,
    /// The request has succeeded.
    Success = 100,

    /// The `requestType` field is missing from the request data.
    MissingRequestType = 203,
    /// The request type is invalid or does not exist.
    UnknownRequestType = 204,
    /// Generic error code. A comment is required.
    GenericError = 205,
    /// The request batch execution type is not supported.
    UnsupportedRequestBatchExecutionType = 206,
    /// The server is not ready to handle the request.
    NotReady = 207,

    /// A required request field is missing.
    MissingRequestField = 300,
    /// The request does not have a valid `requestData` object.
    MissingRequestData = 301,

    /// Generic invalid request field message. A comment is required.
    InvalidRequestField = 400,
    /// A request field has the wrong data type.
    InvalidRequestFieldType = 401,
    /// A request field (number) is outside of the allowed range.
    RequestFieldOutOfRange = 402,
    /// A request field (string or array) is empty and cannot be.
    RequestFieldEmpty = 403,
    /// There are too many request fields.
    TooManyRequestFields = 404,

    /// An output is running and cannot be in order to perform the request.
    OutputRunning = 500,
    /// An output is not running and should be.
    OutputNotRunning = 501,
    /// An output is paused and should not be.
    OutputPaused = 502,
    /// An output is not paused and should be.
    OutputNotPaused = 503,
    /// An output is disabled and should not be.
    OutputDisabled = 504,
    /// Studio mode is active and cannot be.
    StudioModeActive = 505,
    /// Studio mode is not active and should be.
    StudioModeNotActive = 506,

    /// The resource was not found.
    ResourceNotFound = 600,
    /// The resource already exists.
    ResourceAlreadyExists = 601,
    /// The type of resource found is invalid.
    InvalidResourceType = 602,
    /// There are not enough instances of the resource to perform the request.
    NotEnoughResources = 603,
    /// The state of the resource is invalid.
    InvalidResourceState = 604,
    /// The specified input kind is invalid.
    InvalidInputKind = 605,
    /// The resource does not support being configured.
    ResourceNotConfigurable = 606,
    /// The specified filter kind is invalid.
    InvalidFilterKind = 607,

    /// Creating the resource failed.
    ResourceCreationFailed = 700,
    /// Performing an action on the resource failed.
    ResourceActionFailed = 701,
    /// Processing the request failed unexpectedly. A comment is required.
    RequestProcessingFailed = 702,
    /// The combination of request fields cannot be used to perform an action.
    CannotAct = 703,
}

impl RequestStatus {
    /// Numeric wire code.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Whether the status represents a completed request.
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl Serialize for RequestStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.code())
    }
}
