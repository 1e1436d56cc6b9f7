//! Protocol state machine.
//!
//! Decodes one inbound envelope, enforces the `Identify` handshake, and
//! routes requests to the dispatcher or the batch engine. The outcome is a
//! reply to send, an instruction to close the connection, or nothing.

pub mod fields;

use std::sync::Arc;

use serde_json::{Map, Value};
use stagehand_core::auth;
use stagehand_core::constants::is_supported_rpc_version;
use stagehand_core::{
    ClientMessageType, CloseCode, ExecutionType, ProtocolError, Request, RequestResponse,
    RequestResult, RequestStatus, ServerMessage, Session,
};
use tracing::{debug, info, instrument, warn};

use crate::batch::{BatchEngine, BatchRequest};
use crate::rpc::context::{RequestContext, ServiceContext};
use crate::rpc::dispatcher::RequestDispatcher;
use fields::SessionParameters;

/// Outcome of processing one inbound message.
#[derive(Debug, Default)]
pub struct ProcessResult {
    /// Message to send back, if any.
    pub reply: Option<ServerMessage>,
    /// Close the connection with this code and reason.
    pub close: Option<ProtocolError>,
}

impl ProcessResult {
    fn reply(message: ServerMessage) -> Self {
        Self {
            reply: Some(message),
            close: None,
        }
    }

    fn close(error: ProtocolError) -> Self {
        Self {
            reply: None,
            close: Some(error),
        }
    }
}

/// Close codes a session may opt out of with `ignoreInvalidMessages`.
fn is_suppressible(code: CloseCode) -> bool {
    matches!(
        code,
        CloseCode::MessageDecodeError
            | CloseCode::MissingDataKey
            | CloseCode::InvalidDataKeyType
            | CloseCode::InvalidDataKeyValue
            | CloseCode::UnknownMessageType
            | CloseCode::AlreadyIdentified
    )
}

/// Per-server protocol handler shared by every connection.
pub struct ProtocolHandler {
    dispatcher: Arc<RequestDispatcher>,
    batch: BatchEngine,
    services: Arc<ServiceContext>,
}

impl ProtocolHandler {
    /// Create a handler routing through `dispatcher`.
    pub fn new(dispatcher: Arc<RequestDispatcher>, services: Arc<ServiceContext>) -> Self {
        Self {
            batch: BatchEngine::new(dispatcher.clone()),
            dispatcher,
            services,
        }
    }

    /// Server-wide services.
    pub fn services(&self) -> &Arc<ServiceContext> {
        &self.services
    }

    /// Process one text message from `session`.
    #[instrument(skip_all, fields(session_id = %session.id()))]
    pub async fn process_message(&self, session: &Arc<Session>, text: &str) -> ProcessResult {
        match self.process(session, text).await {
            Ok(Some(reply)) => ProcessResult::reply(reply),
            Ok(None) => ProcessResult::default(),
            Err(err) if session.ignore_invalid_messages() && is_suppressible(err.close_code) => {
                debug!(close_code = err.close_code.as_str(), reason = %err.reason, "ignoring invalid message");
                ProcessResult::default()
            }
            Err(err) => {
                info!(close_code = err.close_code.as_str(), reason = %err.reason, "closing session");
                ProcessResult::close(err)
            }
        }
    }

    async fn process(
        &self,
        session: &Arc<Session>,
        text: &str,
    ) -> Result<Option<ServerMessage>, ProtocolError> {
        let payload: Value = serde_json::from_str(text).map_err(|e| {
            ProtocolError::new(
                CloseCode::MessageDecodeError,
                format!("Unable to decode JSON: {e}"),
            )
        })?;
        let Value::Object(object) = payload else {
            return Err(ProtocolError::new(
                CloseCode::MessageDecodeError,
                "Your message is not a JSON object.",
            ));
        };

        let message_type = match object.get("messageType") {
            None | Some(Value::Null) if object.contains_key("request-type") => {
                return Err(ProtocolError::new(
                    CloseCode::UnsupportedRpcVersion,
                    "You are using an old or incompatible client. This server only speaks rpcVersion 1 envelopes.",
                ));
            }
            None | Some(Value::Null) => {
                return Err(ProtocolError::new(
                    CloseCode::UnknownMessageType,
                    "Your message is missing a `messageType`.",
                ));
            }
            Some(Value::String(name)) => name.as_str(),
            Some(_) => return Err(ProtocolError::invalid_key_type("messageType", "a string")),
        };

        let parsed = ClientMessageType::parse(message_type);
        if !session.is_identified() && parsed != Some(ClientMessageType::Identify) {
            return Err(ProtocolError::new(
                CloseCode::NotIdentified,
                "You attempted to send a non-Identify message while not identified.",
            ));
        }

        match parsed {
            Some(ClientMessageType::Identify) => self.identify(session, &object).map(Some),
            Some(ClientMessageType::Reidentify) => self.reidentify(session, &object).map(Some),
            Some(ClientMessageType::Request) => self.request(session, &object).await.map(Some),
            Some(ClientMessageType::RequestBatch) => {
                self.request_batch(session, &object).await.map(Some)
            }
            None => Err(ProtocolError::new(
                CloseCode::UnknownMessageType,
                format!("Unknown messageType `{message_type}`."),
            )),
        }
    }

    fn identify(
        &self,
        session: &Session,
        object: &Map<String, Value>,
    ) -> Result<ServerMessage, ProtocolError> {
        let _guard = session.lock_operation();
        if session.is_identified() {
            return Err(ProtocolError::new(
                CloseCode::AlreadyIdentified,
                "You are already identified with the server.",
            ));
        }

        if session.authentication_required() {
            let candidate = fields::required_str(object, "authentication")?;
            if !auth::check_authentication(&session.secret(), &session.challenge(), candidate) {
                warn!(remote_address = session.remote_address(), "authentication failed");
                return Err(ProtocolError::new(
                    CloseCode::AuthenticationFailed,
                    "Authentication failed.",
                ));
            }
        }

        let requested = fields::required_u64(object, "rpcVersion")?;
        let rpc_version = u8::try_from(requested)
            .ok()
            .filter(|_| is_supported_rpc_version(requested))
            .ok_or_else(|| {
                ProtocolError::new(
                    CloseCode::UnsupportedRpcVersion,
                    format!("Requested rpcVersion {requested} is not supported."),
                )
            })?;

        let params = SessionParameters::parse(object)?;
        session.set_rpc_version(rpc_version);
        let (_, subscriptions) = params.apply(session);
        if self.services.sessions.contains(session.id()) {
            self.services.sessions.high_volume().subscribe(subscriptions);
        }
        session.mark_identified();

        info!(
            rpc_version,
            event_subscriptions = subscriptions,
            "session identified"
        );
        Ok(ServerMessage::Identified {
            negotiated_rpc_version: rpc_version,
        })
    }

    fn reidentify(
        &self,
        session: &Session,
        object: &Map<String, Value>,
    ) -> Result<ServerMessage, ProtocolError> {
        let _guard = session.lock_operation();
        let params = SessionParameters::parse(object)?;
        let (previous, current) = params.apply(session);
        if self.services.sessions.contains(session.id()) {
            self.services.sessions.high_volume().update(previous, current);
        }

        debug!(event_subscriptions = current, "session reidentified");
        Ok(ServerMessage::Identified {
            negotiated_rpc_version: session.rpc_version(),
        })
    }

    async fn request(
        &self,
        session: &Arc<Session>,
        object: &Map<String, Value>,
    ) -> Result<ServerMessage, ProtocolError> {
        let request_id = fields::required_str(object, "requestId")?.to_owned();
        let request_type = object
            .get("requestType")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();

        let request = Request::new(
            request_type.as_str(),
            object.get("requestData").cloned(),
            ExecutionType::None,
        )
        .with_session(session);
        let ctx = RequestContext::new(session.clone(), self.services.clone());
        let dispatcher = self.dispatcher.clone();

        let result = tokio::task::spawn_blocking(move || dispatcher.process_request(&request, &ctx))
            .await
            .unwrap_or_else(|e| {
                RequestResult::error(
                    RequestStatus::RequestProcessingFailed,
                    format!("The request task failed: {e}"),
                )
            });

        Ok(ServerMessage::RequestResponse(RequestResponse::from_result(
            request_type,
            Some(Value::String(request_id)),
            result,
        )))
    }

    async fn request_batch(
        &self,
        session: &Arc<Session>,
        object: &Map<String, Value>,
    ) -> Result<ServerMessage, ProtocolError> {
        let request_id = fields::required_str(object, "requestId")?.to_owned();
        let requests = fields::required_array(object, "requests")?;
        let halt_on_failure = fields::optional_bool(object, "haltOnFailure")?.unwrap_or(false);
        let execution_type = match fields::optional_i64(object, "executionType")? {
            None => ExecutionType::SerialRealtime,
            Some(raw) => ExecutionType::from_wire(raw)
                .filter(|t| t.is_batch_mode())
                .ok_or_else(|| {
                    ProtocolError::new(
                        CloseCode::InvalidDataKeyValue,
                        format!("Your `executionType` of {raw} is not a valid batch execution type."),
                    )
                })?,
        };

        let ctx = RequestContext::new(session.clone(), self.services.clone());
        self.batch
            .check_supported(&ctx, execution_type, halt_on_failure)
            .map_err(|e| ProtocolError::new(CloseCode::UnsupportedFeature, e.to_string()))?;

        let items = requests
            .iter()
            .map(|item| BatchRequest::from_json(item, execution_type, session))
            .collect();
        let results = self
            .batch
            .process_request_batch(ctx, execution_type, items, halt_on_failure)
            .await
            .map_err(|e| ProtocolError::new(CloseCode::UnsupportedFeature, e.to_string()))?;

        Ok(ServerMessage::RequestBatchResponse {
            request_id,
            results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::test_support::dispatcher;
    use crate::rpc::handlers::test_helpers::{make_test_services, make_test_services_with_ticks};
    use crate::tick::HostTickSource;
    use crate::websocket::registry::SessionRegistry;
    use assert_matches::assert_matches;
    use serde_json::json;
    use stagehand_core::auth::{Credentials, authentication_string};
    use stagehand_core::subscriptions::{HighVolumeCategory, INPUT_VOLUME_METERS, SCENES};

    fn handler_with(services: Arc<ServiceContext>) -> ProtocolHandler {
        ProtocolHandler::new(Arc::new(dispatcher()), services)
    }

    fn handler() -> ProtocolHandler {
        handler_with(make_test_services())
    }

    fn session() -> Arc<Session> {
        Arc::new(Session::new("127.0.0.1:9999"))
    }

    async fn send(handler: &ProtocolHandler, session: &Arc<Session>, value: Value) -> ProcessResult {
        handler.process_message(session, &value.to_string()).await
    }

    async fn identified(handler: &ProtocolHandler) -> Arc<Session> {
        let session = session();
        let result = send(handler, &session, json!({"messageType": "Identify", "rpcVersion": 1})).await;
        assert!(result.close.is_none());
        session
    }

    fn close_code(result: &ProcessResult) -> Option<CloseCode> {
        result.close.as_ref().map(|e| e.close_code)
    }

    fn response(result: ProcessResult) -> Value {
        serde_json::to_value(result.reply.unwrap()).unwrap()
    }

    // ── Handshake ───────────────────────────────────────────────────

    #[tokio::test]
    async fn request_before_identify_closes() {
        let handler = handler();
        let session = session();
        let result = send(
            &handler,
            &session,
            json!({"messageType": "Request", "requestType": "GetVersion", "requestId": "1"}),
        )
        .await;
        assert_eq!(close_code(&result), Some(CloseCode::NotIdentified));
        assert!(result.reply.is_none());
    }

    #[tokio::test]
    async fn not_identified_is_never_suppressed() {
        let handler = handler();
        let session = session();
        session.set_ignore_invalid_messages(true);
        let result = send(&handler, &session, json!({"messageType": "Reidentify"})).await;
        assert_eq!(close_code(&result), Some(CloseCode::NotIdentified));
    }

    #[tokio::test]
    async fn identify_without_auth() {
        let handler = handler();
        let session = session();
        let result = send(&handler, &session, json!({"messageType": "Identify", "rpcVersion": 1})).await;
        assert_eq!(
            response(result),
            json!({"messageType": "Identified", "negotiatedRpcVersion": 1})
        );
        assert!(session.is_identified());
        assert_eq!(session.rpc_version(), 1);
    }

    #[tokio::test]
    async fn identify_applies_parameters() {
        let handler = handler();
        let session = session();
        let result = send(
            &handler,
            &session,
            json!({
                "messageType": "Identify",
                "rpcVersion": 1,
                "ignoreInvalidMessages": true,
                "ignoreNonFatalRequestChecks": true,
                "eventSubscriptions": SCENES
            }),
        )
        .await;
        assert!(result.reply.is_some());
        assert!(session.ignore_invalid_messages());
        assert!(session.ignore_non_fatal_request_checks());
        assert_eq!(session.event_subscriptions(), SCENES);
    }

    #[tokio::test]
    async fn identify_bad_parameter_leaves_session_unidentified() {
        let handler = handler();
        let session = session();
        let result = send(
            &handler,
            &session,
            json!({"messageType": "Identify", "rpcVersion": 1, "ignoreInvalidMessages": "yes"}),
        )
        .await;
        assert_eq!(close_code(&result), Some(CloseCode::InvalidDataKeyType));
        assert!(!session.is_identified());
        assert!(!session.ignore_invalid_messages());
    }

    #[tokio::test]
    async fn identify_version_checks() {
        let handler = handler();
        let missing = send(&handler, &session(), json!({"messageType": "Identify"})).await;
        assert_eq!(close_code(&missing), Some(CloseCode::MissingDataKey));

        let wrong_type =
            send(&handler, &session(), json!({"messageType": "Identify", "rpcVersion": "1"})).await;
        assert_eq!(close_code(&wrong_type), Some(CloseCode::InvalidDataKeyType));

        for version in [0, 2, 300] {
            let unsupported = send(
                &handler,
                &session(),
                json!({"messageType": "Identify", "rpcVersion": version}),
            )
            .await;
            assert_eq!(close_code(&unsupported), Some(CloseCode::UnsupportedRpcVersion));
        }
    }

    #[tokio::test]
    async fn double_identify_closes_or_is_ignored() {
        let handler = handler();
        let session = identified(&handler).await;
        let again = send(&handler, &session, json!({"messageType": "Identify", "rpcVersion": 1})).await;
        assert_eq!(close_code(&again), Some(CloseCode::AlreadyIdentified));

        session.set_ignore_invalid_messages(true);
        let ignored = send(&handler, &session, json!({"messageType": "Identify", "rpcVersion": 1})).await;
        assert!(ignored.close.is_none());
        assert!(ignored.reply.is_none());
    }

    // ── Authentication ──────────────────────────────────────────────

    fn auth_handler() -> (ProtocolHandler, Arc<SessionRegistry>, Credentials) {
        let credentials = Credentials::from_password("hunter2");
        let registry = Arc::new(SessionRegistry::new(Some(credentials.clone())));
        let services = Arc::new(ServiceContext::new(registry.clone(), None));
        (handler_with(services), registry, credentials)
    }

    #[tokio::test]
    async fn identify_with_valid_authentication() {
        let (handler, registry, credentials) = auth_handler();
        let session = registry.create_session("peer");
        let auth = authentication_string(&credentials.secret, &session.challenge());
        let result = send(
            &handler,
            &session,
            json!({"messageType": "Identify", "rpcVersion": 1, "authentication": auth}),
        )
        .await;
        assert!(result.close.is_none());
        assert!(session.is_identified());
    }

    #[tokio::test]
    async fn identify_with_wrong_authentication() {
        let (handler, registry, _) = auth_handler();
        let session = registry.create_session("peer");
        session.set_ignore_invalid_messages(true);
        let result = send(
            &handler,
            &session,
            json!({"messageType": "Identify", "rpcVersion": 1, "authentication": "bogus"}),
        )
        .await;
        assert_eq!(close_code(&result), Some(CloseCode::AuthenticationFailed));
        assert!(!session.is_identified());
    }

    #[tokio::test]
    async fn identify_missing_authentication() {
        let (handler, registry, _) = auth_handler();
        let session = registry.create_session("peer");
        let result = send(&handler, &session, json!({"messageType": "Identify", "rpcVersion": 1})).await;
        assert_eq!(close_code(&result), Some(CloseCode::MissingDataKey));
    }

    // ── Envelope errors ─────────────────────────────────────────────

    #[tokio::test]
    async fn malformed_json_closes_with_decode_error() {
        let handler = handler();
        let result = handler.process_message(&session(), "{not json").await;
        assert_eq!(close_code(&result), Some(CloseCode::MessageDecodeError));

        let result = handler.process_message(&session(), "[1, 2]").await;
        assert_eq!(close_code(&result), Some(CloseCode::MessageDecodeError));
    }

    #[tokio::test]
    async fn legacy_envelope_closes_with_version_error() {
        let handler = handler();
        let session = session();
        session.set_ignore_invalid_messages(true);
        let result = send(
            &handler,
            &session,
            json!({"request-type": "GetVersion", "message-id": "1"}),
        )
        .await;
        assert_eq!(close_code(&result), Some(CloseCode::UnsupportedRpcVersion));
    }

    #[tokio::test]
    async fn unknown_message_type() {
        let handler = handler();
        let session = identified(&handler).await;
        let result = send(&handler, &session, json!({"messageType": "Dance"})).await;
        assert_eq!(close_code(&result), Some(CloseCode::UnknownMessageType));

        let result = send(&handler, &session, json!({"messageType": 3})).await;
        assert_eq!(close_code(&result), Some(CloseCode::InvalidDataKeyType));

        let result = send(&handler, &session, json!({"hello": true})).await;
        assert_eq!(close_code(&result), Some(CloseCode::UnknownMessageType));
    }

    #[tokio::test]
    async fn ignore_invalid_messages_suppresses_decode_errors() {
        let handler = handler();
        let session = identified(&handler).await;
        session.set_ignore_invalid_messages(true);
        let result = handler.process_message(&session, "garbage").await;
        assert!(result.close.is_none());
        assert!(result.reply.is_none());
    }

    // ── Requests ────────────────────────────────────────────────────

    #[tokio::test]
    async fn request_round_trip() {
        let handler = handler();
        let session = identified(&handler).await;
        let result = send(
            &handler,
            &session,
            json!({"messageType": "Request", "requestType": "Echo", "requestId": "r1", "requestData": {"a": 1}}),
        )
        .await;
        assert_eq!(
            response(result),
            json!({
                "messageType": "RequestResponse",
                "requestType": "Echo",
                "requestId": "r1",
                "requestStatus": {"result": true, "code": 100},
                "responseData": {"a": 1}
            })
        );
    }

    #[tokio::test]
    async fn request_unknown_type() {
        let handler = handler();
        let session = identified(&handler).await;
        let value = response(
            send(
                &handler,
                &session,
                json!({"messageType": "Request", "requestType": "Nope", "requestId": "r1"}),
            )
            .await,
        );
        assert_eq!(value["requestStatus"]["code"], 204);
        assert_eq!(value["requestId"], "r1");
    }

    #[tokio::test]
    async fn request_missing_type_is_request_error() {
        let handler = handler();
        let session = identified(&handler).await;
        let value = response(
            send(&handler, &session, json!({"messageType": "Request", "requestId": "r1"})).await,
        );
        assert_eq!(value["requestStatus"]["code"], 203);
        assert_eq!(value["requestType"], "");
    }

    #[tokio::test]
    async fn request_id_required() {
        let handler = handler();
        let session = identified(&handler).await;
        let missing =
            send(&handler, &session, json!({"messageType": "Request", "requestType": "Ok"})).await;
        assert_eq!(close_code(&missing), Some(CloseCode::MissingDataKey));

        let wrong = send(
            &handler,
            &session,
            json!({"messageType": "Request", "requestType": "Ok", "requestId": 5}),
        )
        .await;
        assert_eq!(close_code(&wrong), Some(CloseCode::InvalidDataKeyType));
    }

    // ── Batches ─────────────────────────────────────────────────────

    fn batch(execution_type: Option<i64>, halt: bool) -> Value {
        let mut value = json!({
            "messageType": "RequestBatch",
            "requestId": "b1",
            "haltOnFailure": halt,
            "requests": [
                {"requestType": "Ok", "requestId": "a"},
                {"requestType": "Fail", "requestId": "b"},
                {"requestType": "Ok", "requestId": "c"}
            ]
        });
        if let Some(t) = execution_type {
            value["executionType"] = json!(t);
        }
        value
    }

    #[tokio::test]
    async fn batch_defaults_to_serial_realtime() {
        let handler = handler();
        let session = identified(&handler).await;
        let value = response(send(&handler, &session, batch(None, false)).await);
        assert_eq!(value["messageType"], "RequestBatchResponse");
        assert_eq!(value["requestId"], "b1");
        assert_eq!(value["results"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn batch_halt_on_failure() {
        let handler = handler();
        let session = identified(&handler).await;
        let value = response(send(&handler, &session, batch(Some(1), true)).await);
        let results = value["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1]["requestId"], "b");
    }

    #[tokio::test]
    async fn batch_parallel_returns_all() {
        let handler = handler();
        let session = identified(&handler).await;
        let value = response(send(&handler, &session, batch(Some(3), false)).await);
        assert_eq!(value["results"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn batch_rejects_bad_execution_type() {
        let handler = handler();
        let session = identified(&handler).await;
        for raw in [0, 4, -1] {
            let result = send(&handler, &session, batch(Some(raw), false)).await;
            assert_eq!(close_code(&result), Some(CloseCode::InvalidDataKeyValue));
        }
    }

    #[tokio::test]
    async fn batch_unsupported_features() {
        let handler = handler();
        let session = identified(&handler).await;
        let frame = send(&handler, &session, batch(Some(2), false)).await;
        assert_eq!(close_code(&frame), Some(CloseCode::UnsupportedFeature));

        let parallel_halt = send(&handler, &session, batch(Some(3), true)).await;
        assert_eq!(close_code(&parallel_halt), Some(CloseCode::UnsupportedFeature));
    }

    #[tokio::test]
    async fn batch_requires_requests_array() {
        let handler = handler();
        let session = identified(&handler).await;
        let missing = send(
            &handler,
            &session,
            json!({"messageType": "RequestBatch", "requestId": "b"}),
        )
        .await;
        assert_eq!(close_code(&missing), Some(CloseCode::MissingDataKey));

        let wrong = send(
            &handler,
            &session,
            json!({"messageType": "RequestBatch", "requestId": "b", "requests": {}}),
        )
        .await;
        assert_eq!(close_code(&wrong), Some(CloseCode::InvalidDataKeyType));
    }

    #[tokio::test]
    async fn batch_sub_request_without_id_omits_it() {
        let handler = handler();
        let session = identified(&handler).await;
        let value = response(
            send(
                &handler,
                &session,
                json!({"messageType": "RequestBatch", "requestId": "b", "requests": [{"requestType": "Ok"}, 7]}),
            )
            .await,
        );
        let results = value["results"].as_array().unwrap();
        assert!(results[0].get("requestId").is_none());
        assert_eq!(results[1]["requestStatus"]["code"], 203);
    }

    #[tokio::test]
    async fn frame_batch_with_tick_source() {
        let source = Arc::new(HostTickSource::new());
        let handler = handler_with(make_test_services_with_ticks(source.clone()));
        let session = identified(&handler).await;

        let ticker = source.clone();
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let stop_flag = stop.clone();
        let thread = std::thread::spawn(move || {
            while !stop_flag.load(std::sync::atomic::Ordering::Acquire) {
                ticker.tick();
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        });

        let value = response(send(&handler, &session, batch(Some(2), true)).await);
        stop.store(true, std::sync::atomic::Ordering::Release);
        thread.join().unwrap();

        assert_eq!(value["results"].as_array().unwrap().len(), 2);
    }

    // ── Reidentify ──────────────────────────────────────────────────

    #[tokio::test]
    async fn reidentify_updates_parameters_and_high_volume_counts() {
        let services = make_test_services();
        let handler = handler_with(services.clone());
        let session = services.sessions.create_session("peer");
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        services.sessions.add(Arc::new(
            crate::websocket::connection::ClientConnection::new(session.clone(), tx),
        ));

        let _ = send(
            &handler,
            &session,
            json!({"messageType": "Identify", "rpcVersion": 1, "eventSubscriptions": INPUT_VOLUME_METERS}),
        )
        .await;
        let tracker = services.sessions.high_volume();
        assert_eq!(tracker.count(HighVolumeCategory::InputVolumeMeters), 1);

        let result = send(
            &handler,
            &session,
            json!({"messageType": "Reidentify", "eventSubscriptions": SCENES}),
        )
        .await;
        assert_matches!(
            result.reply,
            Some(ServerMessage::Identified { negotiated_rpc_version: 1 })
        );
        assert_eq!(session.event_subscriptions(), SCENES);
        assert_eq!(tracker.count(HighVolumeCategory::InputVolumeMeters), 0);
    }

    #[tokio::test]
    async fn identify_after_disconnect_does_not_leak_high_volume_count() {
        let services = make_test_services();
        let handler = handler_with(services.clone());
        let session = services.sessions.create_session("peer");
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        services.sessions.add(Arc::new(
            crate::websocket::connection::ClientConnection::new(session.clone(), tx),
        ));
        let _ = services.sessions.remove(session.id());

        let result = send(
            &handler,
            &session,
            json!({"messageType": "Identify", "rpcVersion": 1, "eventSubscriptions": INPUT_VOLUME_METERS}),
        )
        .await;
        assert!(result.close.is_none());
        assert_eq!(
            services.sessions.high_volume().count(HighVolumeCategory::InputVolumeMeters),
            0
        );
    }
}
