//! WebSocket close codes used to terminate a session.

use std::fmt;

/// Application close codes sent in the WebSocket close frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    /// Internal only: the connection stays open.
    DontClose = 0,
    /// Unknown reason, should never be used.
    UnknownReason = 4000,
    /// The server was unable to decode the incoming message.
    MessageDecodeError = 4002,
    /// A data key is missing but required.
    MissingDataKey = 4003,
    /// A data key has an invalid type.
    InvalidDataKeyType = 4004,
    /// The specified `messageType` is invalid or missing.
    UnknownMessageType = 4005,
    /// The client sent a message other than `Identify` before identifying.
    NotIdentified = 4006,
    /// The client sent `Identify` after already identifying.
    AlreadyIdentified = 4007,
    /// The authentication attempt failed.
    AuthenticationFailed = 4008,
    /// The requested `rpcVersion` is not supported.
    UnsupportedRpcVersion = 4009,
    /// The session was invalidated by the server.
    SessionInvalidated = 4010,
    /// A data key's value is invalid, such as an out-of-range enum.
    InvalidDataKeyValue = 4011,
    /// A feature is not supported due to server configuration.
    UnsupportedFeature = 4012,
}

impl CloseCode {
    /// Numeric close frame code.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Short label for logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DontClose => "dont_close",
            Self::UnknownReason => "unknown_reason",
            Self::MessageDecodeError => "message_decode_error",
            Self::MissingDataKey => "missing_data_key",
            Self::InvalidDataKeyType => "invalid_data_key_type",
            Self::UnknownMessageType => "unknown_message_type",
            Self::NotIdentified => "not_identified",
            Self::AlreadyIdentified => "already_identified",
            Self::AuthenticationFailed => "authentication_failed",
            Self::UnsupportedRpcVersion => "unsupported_rpc_version",
            Self::SessionInvalidated => "session_invalidated",
            Self::InvalidDataKeyValue => "invalid_data_key_value",
            Self::UnsupportedFeature => "unsupported_feature",
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.code())
    }
}
