//! # stagehand-core
//!
//! Shared vocabulary of the Stagehand remote-control protocol.
//!
//! - **Session**: per-connection handshake state, counters and subscriptions
//! - **Request / `RequestResult`**: decoded requests, outcomes, and the
//!   `requestData` validation helpers
//! - **Status and close codes**: request-level and connection-level failures
//! - **Authentication**: salted SHA-256 challenge-response
//! - **Messages**: server envelopes tagged by `messageType`
//! - **Subscriptions**: the event category bitmask

#![deny(unsafe_code)]

pub mod auth;
pub mod close_code;
pub mod constants;
pub mod errors;
pub mod logging;
pub mod messages;
pub mod request;
pub mod session;
pub mod status;
pub mod subscriptions;
pub mod validation;

pub use close_code::CloseCode;
pub use errors::{ProtocolError, RequestError};
pub use messages::{ClientMessageType, RequestResponse, ServerMessage};
pub use request::{ExecutionType, Request, RequestResult};
pub use session::Session;
pub use status::RequestStatus;
