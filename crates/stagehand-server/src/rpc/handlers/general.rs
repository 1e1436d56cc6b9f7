//! General handlers: version, stats, custom events, sleep.

use std::time::Duration;

use serde_json::{Value, json};
use stagehand_core::constants::{LATEST_RPC_VERSION, VERSION};
use stagehand_core::subscriptions;
use stagehand_core::{ExecutionType, Request, RequestError, RequestResult, RequestStatus};
use tracing::{debug, instrument};

use crate::rpc::context::RequestContext;
use crate::rpc::dispatcher::RequestHandler;

/// Longest accepted `sleepMillis`.
pub const MAX_SLEEP_MILLIS: i64 = 50_000;
/// Longest accepted `sleepFrames`.
pub const MAX_SLEEP_FRAMES: i64 = 10_000;

/// Report the server and protocol versions and every request type.
pub struct GetVersionHandler {
    available_requests: Vec<String>,
}

impl GetVersionHandler {
    /// Capture the request type list at registration time.
    pub fn new(available_requests: Vec<String>) -> Self {
        Self { available_requests }
    }
}

impl RequestHandler for GetVersionHandler {
    fn handle(&self, _request: &Request, _ctx: &RequestContext) -> Result<RequestResult, RequestError> {
        Ok(RequestResult::success_with_data(json!({
            "serverVersion": VERSION,
            "rpcVersion": LATEST_RPC_VERSION,
            "availableRequests": self.available_requests,
        })))
    }
}

/// Report connection counters for the calling session.
pub struct GetStatsHandler;

impl RequestHandler for GetStatsHandler {
    fn handle(&self, _request: &Request, ctx: &RequestContext) -> Result<RequestResult, RequestError> {
        Ok(RequestResult::success_with_data(json!({
            "activeSessions": ctx.services.sessions.connection_count(),
            "sessionIncomingMessages": ctx.session.incoming_messages(),
            "sessionOutgoingMessages": ctx.session.outgoing_messages(),
            "uptimeSecs": ctx.services.server_start_time.elapsed().as_secs(),
        })))
    }
}

/// Broadcast `CustomEvent` to every session subscribed to `General`.
pub struct BroadcastCustomEventHandler;

impl RequestHandler for BroadcastCustomEventHandler {
    #[instrument(skip_all, fields(request_type = "BroadcastCustomEvent"))]
    fn handle(&self, request: &Request, ctx: &RequestContext) -> Result<RequestResult, RequestError> {
        let event_data = request.validate_object("eventData", true)?;
        request.non_fatal(if event_data.is_empty() {
            Err(RequestError::empty("eventData"))
        } else {
            Ok(())
        })?;

        let recipients = ctx.services.sessions.broadcast_event(
            subscriptions::GENERAL,
            "CustomEvent",
            Some(Value::Object(event_data.clone())),
            1,
        );
        debug!(recipients, "custom event broadcast");
        Ok(RequestResult::success())
    }
}

/// Pause a serial batch, by wall-clock time or by frames.
pub struct SleepHandler;

impl RequestHandler for SleepHandler {
    fn handle(&self, request: &Request, _ctx: &RequestContext) -> Result<RequestResult, RequestError> {
        match request.execution_type {
            ExecutionType::SerialRealtime => {
                let millis = request.validate_integer("sleepMillis", 0, MAX_SLEEP_MILLIS)?;
                let millis = u64::try_from(millis).unwrap_or_default();
                std::thread::sleep(Duration::from_millis(millis));
                Ok(RequestResult::success())
            }
            ExecutionType::SerialFrame => {
                let frames = request.validate_integer("sleepFrames", 0, MAX_SLEEP_FRAMES)?;
                let frames = u32::try_from(frames).unwrap_or_default();
                Ok(RequestResult::success().with_sleep_frames(frames))
            }
            ExecutionType::None | ExecutionType::Parallel => Err(RequestError::new(
                RequestStatus::UnsupportedRequestBatchExecutionType,
                "Sleep can only be used in a serial request batch.",
            )),
        }
    }
}
