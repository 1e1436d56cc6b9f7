//! Parallel execution on the blocking pool.

use std::sync::Arc;

use stagehand_core::{RequestResponse, RequestResult, RequestStatus};
use tokio::task::JoinSet;
use tracing::error;

use super::BatchRequest;
use crate::rpc::context::RequestContext;
use crate::rpc::dispatcher::RequestDispatcher;

/// Run every request as its own blocking task.
///
/// Results come back in completion order. Variables are not applied.
pub(super) async fn run(
    dispatcher: &Arc<RequestDispatcher>,
    ctx: &RequestContext,
    requests: Vec<BatchRequest>,
) -> Vec<RequestResponse> {
    let mut tasks = JoinSet::new();
    for item in requests {
        let dispatcher = dispatcher.clone();
        let ctx = ctx.clone();
        let _ = tasks.spawn_blocking(move || {
            let result = dispatcher.process_request(&item.request, &ctx);
            item.into_response(result)
        });
    }

    let mut results = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(response) => results.push(response),
            Err(e) => {
                error!(error = %e, "parallel request task failed");
                results.push(RequestResponse::from_result(
                    "",
                    None,
                    RequestResult::error(
                        RequestStatus::RequestProcessingFailed,
                        "The request task failed unexpectedly.",
                    ),
                ));
            }
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::test_support::{dispatcher, entry};
    use crate::rpc::handlers::test_helpers::make_test_context;
    use serde_json::{Value, json};
    use stagehand_core::ExecutionType;

    fn items(ctx: &RequestContext, values: &[Value]) -> Vec<BatchRequest> {
        values
            .iter()
            .map(|v| BatchRequest::from_json(v, ExecutionType::Parallel, &ctx.session))
            .collect()
    }

    #[tokio::test]
    async fn returns_one_result_per_request() {
        let ctx = make_test_context();
        let values: Vec<Value> = (0..16).map(|i| entry(if i % 3 == 0 { "Fail" } else { "Ok" }, &i.to_string())).collect();
        let results = run(&Arc::new(dispatcher()), &ctx, items(&ctx, &values)).await;
        assert_eq!(results.len(), 16);
        assert_eq!(results.iter().filter(|r| !r.is_success()).count(), 6);

        let mut ids: Vec<String> = results
            .iter()
            .map(|r| r.request_id.as_ref().and_then(Value::as_str).unwrap().to_owned())
            .collect();
        ids.sort_by_key(|id| id.parse::<u32>().unwrap());
        let expected: Vec<String> = (0..16).map(|i: u32| i.to_string()).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn sleep_is_rejected_in_parallel() {
        let ctx = make_test_context();
        let values = [json!({"requestType": "Sleep", "requestData": {"sleepMillis": 1}})];
        let results = run(&Arc::new(dispatcher()), &ctx, items(&ctx, &values)).await;
        assert_eq!(results[0].request_status.code, RequestStatus::UnsupportedRequestBatchExecutionType);
    }

    #[tokio::test]
    async fn variables_are_not_applied() {
        let ctx = make_test_context();
        let values = [json!({"requestType": "Echo", "inputVariables": {"v": "field"}})];
        let results = run(&Arc::new(dispatcher()), &ctx, items(&ctx, &values)).await;
        assert!(results[0].response_data.as_ref().is_none_or(|d| d.get("field").is_none()));
    }

    #[tokio::test]
    async fn empty_batch() {
        let ctx = make_test_context();
        assert!(run(&Arc::new(dispatcher()), &ctx, Vec::new()).await.is_empty());
    }
}
