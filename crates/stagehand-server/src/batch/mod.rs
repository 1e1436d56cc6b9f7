//! Request batch execution.
//!
//! A batch runs under one of three strategies:
//!
//! - **SerialRealtime**: one request after another on a blocking worker.
//! - **SerialFrame**: drained from the host tick thread, pausing between
//!   frames on request.
//! - **Parallel**: every request on its own blocking task.
//!
//! The serial strategies share one variable scope across the batch.

mod frame;
mod parallel;
pub mod variables;

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde_json::{Map, Value};
use stagehand_core::{
    ExecutionType, Request, RequestResponse, RequestResult, RequestStatus, Session,
};
use tokio::task::JoinError;
use tracing::{debug, error, instrument};

use crate::metrics::{BATCHES_TOTAL, BATCH_DURATION_SECONDS};
use crate::rpc::context::RequestContext;
use crate::rpc::dispatcher::RequestDispatcher;

/// Batch configurations the engine refuses to run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    /// Frame-gated batches need a host render loop.
    #[error("Serial frame batches are not available without a host tick source.")]
    NoTickSource,
    /// Parallel requests cannot be halted.
    #[error("`haltOnFailure` is not supported with parallel execution.")]
    HaltUnsupported,
    /// `ExecutionType::None` is not a batch mode.
    #[error("Execution type `{0}` cannot run a batch.")]
    NotBatchMode(&'static str),
}

/// One entry of a `RequestBatch`.
#[derive(Clone, Debug)]
pub struct BatchRequest {
    /// The decoded request.
    pub request: Request,
    /// Echoed in the response when present.
    pub request_id: Option<Value>,
    /// `{variableName: requestDataField}`.
    pub input_variables: Option<Value>,
    /// `{variableName: responseDataField}`.
    pub output_variables: Option<Value>,
}

impl BatchRequest {
    /// Decode one entry of the `requests` array.
    ///
    /// Non-object entries become an empty request, which the dispatcher
    /// reports as missing its `requestType`.
    pub fn from_json(item: &Value, execution_type: ExecutionType, session: &Session) -> Self {
        let empty = Map::new();
        let object = item.as_object().unwrap_or(&empty);
        let request_type = object
            .get("requestType")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let request = Request::new(
            request_type,
            object.get("requestData").cloned(),
            execution_type,
        )
        .with_session(session);

        Self {
            request,
            request_id: object.get("requestId").cloned(),
            input_variables: object.get("inputVariables").cloned(),
            output_variables: object.get("outputVariables").cloned(),
        }
    }

    /// Shape the result of this entry for the wire.
    pub fn into_response(self, result: RequestResult) -> RequestResponse {
        RequestResponse::from_result(self.request.request_type, self.request_id, result)
    }
}

/// Runs request batches against a dispatcher.
#[derive(Clone)]
pub struct BatchEngine {
    dispatcher: Arc<RequestDispatcher>,
}

impl BatchEngine {
    /// Create an engine dispatching through `dispatcher`.
    pub fn new(dispatcher: Arc<RequestDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Check that the server can run this batch configuration.
    pub fn check_supported(
        &self,
        ctx: &RequestContext,
        execution_type: ExecutionType,
        halt_on_failure: bool,
    ) -> Result<(), BatchError> {
        match execution_type {
            ExecutionType::None => Err(BatchError::NotBatchMode(execution_type.as_str())),
            ExecutionType::SerialFrame if ctx.services.tick_source.is_none() => {
                Err(BatchError::NoTickSource)
            }
            ExecutionType::Parallel if halt_on_failure => Err(BatchError::HaltUnsupported),
            _ => Ok(()),
        }
    }

    /// Run `requests` and return one response per executed request.
    #[instrument(skip_all, fields(execution_type = execution_type.as_str(), count = requests.len()))]
    pub async fn process_request_batch(
        &self,
        ctx: RequestContext,
        execution_type: ExecutionType,
        requests: Vec<BatchRequest>,
        halt_on_failure: bool,
    ) -> Result<Vec<RequestResponse>, BatchError> {
        self.check_supported(&ctx, execution_type, halt_on_failure)?;
        counter!(BATCHES_TOTAL, "execution_type" => execution_type.as_str()).increment(1);
        let start = Instant::now();

        let results = match execution_type {
            ExecutionType::SerialRealtime => {
                let dispatcher = self.dispatcher.clone();
                serial_results(
                    tokio::task::spawn_blocking(move || {
                        run_serial_realtime(&dispatcher, &ctx, requests, halt_on_failure)
                    })
                    .await,
                )
            }
            ExecutionType::SerialFrame => {
                let Some(tick_source) = ctx.services.tick_source.clone() else {
                    return Err(BatchError::NoTickSource);
                };
                let shutdown = ctx.services.shutdown.token();
                frame::run(
                    self.dispatcher.clone(),
                    ctx,
                    tick_source,
                    requests,
                    halt_on_failure,
                    shutdown,
                )
                .await
            }
            ExecutionType::Parallel => parallel::run(&self.dispatcher, &ctx, requests).await,
            ExecutionType::None => return Err(BatchError::NotBatchMode(execution_type.as_str())),
        };

        histogram!(BATCH_DURATION_SECONDS, "execution_type" => execution_type.as_str())
            .record(start.elapsed().as_secs_f64());
        debug!(results = results.len(), "batch complete");
        Ok(results)
    }
}

/// Results of a joined serial worker. A failed worker yields a single
/// `RequestProcessingFailed` entry instead of an empty batch.
fn serial_results(joined: Result<Vec<RequestResponse>, JoinError>) -> Vec<RequestResponse> {
    joined.unwrap_or_else(|e| {
        error!(error = %e, "serial batch worker failed");
        vec![RequestResponse::from_result(
            "",
            None,
            RequestResult::error(
                RequestStatus::RequestProcessingFailed,
                "The batch worker failed unexpectedly.",
            ),
        )]
    })
}

/// Run a batch in order on the current thread.
fn run_serial_realtime(
    dispatcher: &RequestDispatcher,
    ctx: &RequestContext,
    requests: Vec<BatchRequest>,
    halt_on_failure: bool,
) -> Vec<RequestResponse> {
    let mut variables = Map::new();
    let mut results = Vec::with_capacity(requests.len());

    for mut item in requests {
        variables::pre_process(&variables, &mut item);
        let result = dispatcher.process_request(&item.request, ctx);
        variables::post_process(&mut variables, &item, &result);

        let failed = !result.is_success();
        results.push(item.into_response(result));
        if failed && halt_on_failure {
            debug!(executed = results.len(), "halting batch after failure");
            break;
        }
    }
    results
}
