//! Frame-gated serial execution.
//!
//! The batch is handed to the host tick thread as a queue. Each tick drains
//! the queue until it is empty, until a request asks to sleep for some
//! frames, or until a failure halts the batch. The caller awaits a oneshot
//! fired by the tick that empties the queue.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use stagehand_core::RequestResponse;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{BatchRequest, variables};
use crate::rpc::context::RequestContext;
use crate::rpc::dispatcher::RequestDispatcher;
use crate::tick::{TickCallback, TickSource};

struct FrameBatch {
    queue: VecDeque<BatchRequest>,
    results: Vec<RequestResponse>,
    variables: Map<String, Value>,
    halt_on_failure: bool,
    frame_count: u64,
    sleep_until_frame: u64,
    done: Option<oneshot::Sender<()>>,
}

impl FrameBatch {
    /// Process one tick.
    fn tick(&mut self, dispatcher: &RequestDispatcher, ctx: &RequestContext) {
        if self.done.is_none() {
            return;
        }
        self.frame_count += 1;
        if self.frame_count < self.sleep_until_frame {
            return;
        }

        while let Some(mut item) = self.queue.pop_front() {
            variables::pre_process(&self.variables, &mut item);
            let result = dispatcher.process_request(&item.request, ctx);
            variables::post_process(&mut self.variables, &item, &result);

            let failed = !result.is_success();
            let sleep_frames = result.sleep_frames;
            self.results.push(item.into_response(result));

            if failed && self.halt_on_failure {
                debug!(executed = self.results.len(), "halting frame batch after failure");
                self.queue.clear();
                break;
            }
            if sleep_frames > 0 {
                self.sleep_until_frame = self.frame_count + u64::from(sleep_frames);
                break;
            }
        }

        if self.queue.is_empty() {
            if let Some(done) = self.done.take() {
                let _ = done.send(());
            }
        }
    }
}

/// Run a batch on the tick thread and wait for it to drain.
///
/// A shutdown abandons the wait and returns whatever finished so far.
pub(super) async fn run(
    dispatcher: Arc<RequestDispatcher>,
    ctx: RequestContext,
    tick_source: Arc<dyn TickSource>,
    requests: Vec<BatchRequest>,
    halt_on_failure: bool,
    shutdown: CancellationToken,
) -> Vec<RequestResponse> {
    if requests.is_empty() {
        return Vec::new();
    }

    let (done_tx, done_rx) = oneshot::channel();
    let state = Arc::new(Mutex::new(FrameBatch {
        results: Vec::with_capacity(requests.len()),
        queue: requests.into(),
        variables: Map::new(),
        halt_on_failure,
        frame_count: 0,
        sleep_until_frame: 0,
        done: Some(done_tx),
    }));

    let tick_state = state.clone();
    let callback: TickCallback = Arc::new(move || tick_state.lock().tick(&dispatcher, &ctx));
    let handle = tick_source.register(callback);

    tokio::select! {
        _ = done_rx => {}
        () = shutdown.cancelled() => {
            warn!("server shutting down, abandoning frame batch");
        }
    }
    tick_source.unregister(handle);

    // A tick in progress still holds the batch lock.
    tokio::task::spawn_blocking(move || {
        let mut state = state.lock();
        state.queue.clear();
        let _ = state.done.take();
        std::mem::take(&mut state.results)
    })
    .await
    .unwrap_or_else(|e| {
        error!(error = %e, "frame batch drain failed");
        Vec::new()
    })
}
