//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use stagehand_core::{CloseCode, ProtocolError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::{ClientConnection, Outbound};
use super::registry::SessionRegistry;
use crate::metrics::{
    WS_CLOSES_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
};
use crate::protocol::{ProcessResult, ProtocolHandler};

/// Outbound frames buffered per connection before messages are dropped.
const OUTBOUND_CAPACITY: usize = 1024;

/// Longest close reason that fits a control frame.
const MAX_CLOSE_REASON_BYTES: usize = 123;

/// How long cleanup waits for queued frames to flush.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Liveness settings for one connection.
#[derive(Clone, Copy, Debug)]
pub struct SessionOptions {
    /// Interval between server Ping frames.
    pub ping_interval: Duration,
    /// Silence after which the client is considered gone.
    pub pong_timeout: Duration,
}

/// Run a WebSocket session for a connected client.
///
/// 1. Creates the protocol session and sends `Hello`
/// 2. Processes each inbound text frame in its own task
/// 3. Forwards replies, events and close frames via the outbound queue
/// 4. Pings the client and drops it when it stops answering
/// 5. Unregisters the session on disconnect
#[instrument(skip_all, fields(remote_addr = %remote_addr, session_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    remote_addr: SocketAddr,
    protocol: Arc<ProtocolHandler>,
    registry: Arc<SessionRegistry>,
    options: SessionOptions,
    shutdown: CancellationToken,
) {
    let (ws_tx, mut ws_rx) = ws.split();

    let session = registry.create_session(remote_addr.to_string());
    let _ = tracing::Span::current().record("session_id", session.id());
    let (send_tx, send_rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);
    let connection = Arc::new(ClientConnection::new(session.clone(), send_tx));
    registry.add(connection.clone());

    let connection_start = Instant::now();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let _ = connection.send_message(&registry.hello_message(&session));

    let outbound = tokio::spawn(forward_outbound(ws_tx, send_rx, connection.clone(), options));
    let outbound_abort = outbound.abort_handle();

    loop {
        let frame = tokio::select! {
            () = connection.closed() => break,
            () = shutdown.cancelled() => {
                debug!("server shutting down, ending session");
                break;
            }
            frame = ws_rx.next() => frame,
        };
        let Some(Ok(frame)) = frame else { break };

        let text = match frame {
            Message::Text(text) => text.to_string(),
            Message::Binary(data) => {
                let Some(text) = binary_text(&connection, &data) else {
                    connection.mark_alive();
                    continue;
                };
                text
            }
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                connection.mark_alive();
                continue;
            }
        };
        connection.mark_alive();
        let _ = session.increment_incoming_messages();

        let protocol = protocol.clone();
        let connection = connection.clone();
        drop(tokio::spawn(async move {
            let result = protocol.process_message(connection.session(), &text).await;
            deliver(&connection, result);
        }));
    }

    connection.mark_closed();
    let _ = registry.remove(session.id());
    if tokio::time::timeout(FLUSH_TIMEOUT, outbound).await.is_err() {
        outbound_abort.abort();
    }

    info!(
        incoming = session.incoming_messages(),
        outgoing = session.outgoing_messages(),
        dropped = connection.drop_count(),
        "client disconnected"
    );
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection_start.elapsed().as_secs_f64());
}

/// Text of a binary frame. Invalid UTF-8 closes the session with
/// `MessageDecodeError` unless the client asked for invalid messages to be
/// ignored.
fn binary_text(connection: &ClientConnection, data: &[u8]) -> Option<String> {
    match String::from_utf8(data.to_vec()) {
        Ok(text) => Some(text),
        Err(e) => {
            if connection.session().ignore_invalid_messages() {
                debug!(error = %e, "ignoring binary frame that is not valid UTF-8");
            } else {
                deliver(
                    connection,
                    ProcessResult {
                        reply: None,
                        close: Some(ProtocolError::new(
                            CloseCode::MessageDecodeError,
                            "Binary frame is not valid UTF-8.",
                        )),
                    },
                );
            }
            None
        }
    }
}

/// Route a protocol outcome to the client.
fn deliver(connection: &ClientConnection, result: ProcessResult) {
    if let Some(reply) = result.reply {
        if connection.is_closed() {
            debug!("dropping reply for closing session");
        } else if !connection.send_message(&reply) {
            warn!("failed to enqueue reply (channel full or closed)");
        }
    }
    if let Some(error) = result.close {
        counter!(WS_CLOSES_TOTAL, "code" => error.close_code.as_str()).increment(1);
        connection.close(error.close_code, error.reason);
    }
}

/// Write queued frames to the socket and keep the client alive with Pings.
///
/// Once the connection starts closing, frames already queued are still
/// written so a pending close frame reaches the client.
async fn forward_outbound(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<Outbound>,
    connection: Arc<ClientConnection>,
    options: SessionOptions,
) {
    let mut ping_interval = tokio::time::interval(options.ping_interval);
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            biased;
            frame = send_rx.recv() => {
                let Some(frame) = frame else { break };
                if !write_frame(&mut ws_tx, frame).await {
                    return;
                }
            }
            () = connection.closed() => {
                while let Ok(frame) = send_rx.try_recv() {
                    if !write_frame(&mut ws_tx, frame).await {
                        return;
                    }
                }
                break;
            }
            _ = ping_interval.tick() => {
                if !connection.check_alive() && connection.last_pong_elapsed() > options.pong_timeout {
                    warn!("client unresponsive for {:?}, disconnecting", options.pong_timeout);
                    connection.mark_closed();
                    break;
                }
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = ws_tx.close().await;
}

/// Write one frame. Returns `false` once the socket should stop being
/// written to.
async fn write_frame(ws_tx: &mut SplitSink<WebSocket, Message>, frame: Outbound) -> bool {
    match frame {
        Outbound::Text(text) => ws_tx
            .send(Message::Text(String::clone(&text).into()))
            .await
            .is_ok(),
        Outbound::Close { code, reason } => {
            let frame = CloseFrame {
                code: code.code(),
                reason: truncate_reason(&reason).to_owned().into(),
            };
            let _ = ws_tx.send(Message::Close(Some(frame))).await;
            false
        }
    }
}

/// Cut `reason` to the control-frame limit on a char boundary.
fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON_BYTES {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON_BYTES;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}
