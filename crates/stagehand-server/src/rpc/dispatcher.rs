//! Request type registry and synchronous dispatch.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use stagehand_core::{Request, RequestError, RequestResult, RequestStatus};
use tracing::{debug, error, warn};

use crate::metrics::{REQUEST_DURATION_SECONDS, REQUEST_ERRORS_TOTAL, REQUESTS_TOTAL};
use crate::rpc::context::RequestContext;

/// Trait implemented by every request handler.
///
/// Handlers run on blocking worker threads or on the host tick thread, so
/// they are synchronous.
pub trait RequestHandler: Send + Sync {
    /// Execute the request.
    fn handle(&self, request: &Request, ctx: &RequestContext) -> Result<RequestResult, RequestError>;
}

impl<F> RequestHandler for F
where
    F: Fn(&Request, &RequestContext) -> Result<RequestResult, RequestError> + Send + Sync,
{
    fn handle(&self, request: &Request, ctx: &RequestContext) -> Result<RequestResult, RequestError> {
        self(request, ctx)
    }
}

/// Maps request type names to handlers.
pub struct RequestDispatcher {
    handlers: HashMap<String, Arc<dyn RequestHandler>>,
}

impl RequestDispatcher {
    /// Requests slower than this are logged.
    const SLOW_REQUEST: Duration = Duration::from_secs(1);

    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler. A later registration of the same name wins.
    pub fn register(&mut self, request_type: &str, handler: impl RequestHandler + 'static) {
        let _ = self
            .handlers
            .insert(request_type.to_owned(), Arc::new(handler));
    }

    /// All registered request types (sorted).
    pub fn request_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether a request type is registered.
    pub fn has_request_type(&self, request_type: &str) -> bool {
        self.handlers.contains_key(request_type)
    }

    /// Run one request to completion.
    ///
    /// Never fails: every problem, including a panicking handler, is
    /// reported through the returned status.
    pub fn process_request(&self, request: &Request, ctx: &RequestContext) -> RequestResult {
        let request_type = request.request_type.as_str();

        if request.is_request_data_malformed() {
            return RequestResult::error(
                RequestStatus::InvalidRequestFieldType,
                "Your request data is not an object.",
            );
        }
        if request_type.is_empty() {
            return RequestResult::error(
                RequestStatus::MissingRequestType,
                "Your request is missing a `requestType`",
            );
        }
        let Some(handler) = self.handlers.get(request_type) else {
            warn!(request_type, "unknown request type");
            counter!(REQUEST_ERRORS_TOTAL, "request_type" => "unknown", "status" => "204").increment(1);
            return RequestResult::error(
                RequestStatus::UnknownRequestType,
                "Your request type is not valid.",
            );
        };

        counter!(REQUESTS_TOTAL, "request_type" => request_type.to_owned()).increment(1);
        debug!(request_type, execution_type = request.execution_type.as_str(), "dispatching request");

        let start = Instant::now();
        let result = match catch_unwind(AssertUnwindSafe(|| handler.handle(request, ctx))) {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => RequestResult::from(err),
            Err(_panic) => {
                error!(request_type, "request handler panicked");
                RequestResult::error(
                    RequestStatus::RequestProcessingFailed,
                    format!("The `{request_type}` handler failed unexpectedly."),
                )
            }
        };

        let duration = start.elapsed();
        histogram!(REQUEST_DURATION_SECONDS, "request_type" => request_type.to_owned())
            .record(duration.as_secs_f64());
        if !result.is_success() {
            counter!(
                REQUEST_ERRORS_TOTAL,
                "request_type" => request_type.to_owned(),
                "status" => result.status.code().to_string()
            )
            .increment(1);
        }
        if duration >= Self::SLOW_REQUEST {
            warn!(
                request_type,
                duration_secs = duration.as_secs_f64(),
                "slow request"
            );
        }

        result
    }
}

impl Default for RequestDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::handlers::test_helpers::make_test_context;
    use serde_json::{Value, json};
    use stagehand_core::ExecutionType;

    // ── Test handler implementations ────────────────────────────────

    struct EchoHandler;

    impl RequestHandler for EchoHandler {
        fn handle(&self, request: &Request, _ctx: &RequestContext) -> Result<RequestResult, RequestError> {
            Ok(RequestResult::success_with_data(Value::Object(
                request.request_data.clone(),
            )))
        }
    }

    struct FailHandler;

    impl RequestHandler for FailHandler {
        fn handle(&self, _request: &Request, _ctx: &RequestContext) -> Result<RequestResult, RequestError> {
            Err(RequestError::new(RequestStatus::ResourceNotFound, "no such thing"))
        }
    }

    struct PanicHandler;

    impl RequestHandler for PanicHandler {
        fn handle(&self, _request: &Request, _ctx: &RequestContext) -> Result<RequestResult, RequestError> {
            panic!("handler exploded");
        }
    }

    fn request(request_type: &str, data: Option<Value>) -> Request {
        Request::new(request_type, data, ExecutionType::None)
    }

    fn dispatcher() -> RequestDispatcher {
        let mut d = RequestDispatcher::new();
        d.register("Echo", EchoHandler);
        d.register("Fail", FailHandler);
        d.register("Panic", PanicHandler);
        d
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[test]
    fn dispatch_success() {
        let ctx = make_test_context();
        let result = dispatcher().process_request(&request("Echo", Some(json!({"x": 1}))), &ctx);
        assert!(result.is_success());
        assert_eq!(result.response_data, Some(json!({"x": 1})));
    }

    #[test]
    fn handler_error_becomes_status() {
        let ctx = make_test_context();
        let result = dispatcher().process_request(&request("Fail", None), &ctx);
        assert_eq!(result.status, RequestStatus::ResourceNotFound);
        assert_eq!(result.comment, "no such thing");
    }

    #[test]
    fn unknown_type() {
        let ctx = make_test_context();
        let result = dispatcher().process_request(&request("Nope", None), &ctx);
        assert_eq!(result.status, RequestStatus::UnknownRequestType);
        assert_eq!(result.comment, "Your request type is not valid.");
    }

    #[test]
    fn empty_type() {
        let ctx = make_test_context();
        let result = dispatcher().process_request(&request("", None), &ctx);
        assert_eq!(result.status, RequestStatus::MissingRequestType);
    }

    #[test]
    fn malformed_data_checked_before_type() {
        let ctx = make_test_context();
        let result = dispatcher().process_request(&request("Nope", Some(json!([1, 2]))), &ctx);
        assert_eq!(result.status, RequestStatus::InvalidRequestFieldType);
        assert_eq!(result.comment, "Your request data is not an object.");
    }

    #[test]
    fn panic_is_contained() {
        let ctx = make_test_context();
        let result = dispatcher().process_request(&request("Panic", None), &ctx);
        assert_eq!(result.status, RequestStatus::RequestProcessingFailed);
    }

    #[test]
    fn closures_are_handlers() {
        let ctx = make_test_context();
        let mut d = RequestDispatcher::new();
        d.register("Ping", |_: &Request, _: &RequestContext| -> Result<RequestResult, RequestError> {
            Ok(RequestResult::success_with_data(json!({"pong": true})))
        });
        let result = d.process_request(&request("Ping", None), &ctx);
        assert_eq!(result.response_data, Some(json!({"pong": true})));
    }

    #[test]
    fn request_types_sorted() {
        let d = dispatcher();
        assert_eq!(d.request_types(), vec!["Echo", "Fail", "Panic"]);
        assert!(d.has_request_type("Echo"));
        assert!(!d.has_request_type("echo"));
    }

    #[test]
    fn later_registration_wins() {
        let ctx = make_test_context();
        let mut d = RequestDispatcher::new();
        d.register("X", FailHandler);
        d.register("X", EchoHandler);
        assert!(d.process_request(&request("X", None), &ctx).is_success());
        assert_eq!(d.request_types().len(), 1);
    }
}
