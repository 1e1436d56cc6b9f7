//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use stagehand_core::{CloseCode, ServerMessage, Session};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Frames queued for the outbound forwarder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// A JSON text frame.
    Text(Arc<String>),
    /// Send a close frame and stop writing.
    Close {
        /// Close frame code.
        code: CloseCode,
        /// Human-readable reason.
        reason: String,
    },
}

/// A connected WebSocket client and its protocol session.
pub struct ClientConnection {
    session: Arc<Session>,
    tx: mpsc::Sender<Outbound>,
    closed: CancellationToken,
    /// When this connection was established.
    pub connected_at: Instant,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Wrap a session and the sender half of its outbound queue.
    pub fn new(session: Arc<Session>, tx: mpsc::Sender<Outbound>) -> Self {
        let now = Instant::now();
        Self {
            session,
            tx,
            closed: CancellationToken::new(),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> &str {
        self.session.id()
    }

    /// The protocol session.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Queue an outbound frame.
    ///
    /// Returns `false` if the queue is full or closed, and counts the drop.
    pub fn send(&self, frame: Outbound) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(crate::metrics::WS_OUTBOUND_DROPS_TOTAL).increment(1);
            false
        }
    }

    /// Queue an encoded text frame, counting it as outgoing.
    pub fn send_text(&self, json: Arc<String>) -> bool {
        let sent = self.send(Outbound::Text(json));
        if sent {
            let _ = self.session.increment_outgoing_messages();
        }
        sent
    }

    /// Serialize a server message and queue it.
    pub fn send_message(&self, message: &ServerMessage) -> bool {
        match message.to_json() {
            Ok(json) => self.send_text(Arc::new(json)),
            Err(e) => {
                warn!(session_id = %self.id(), error = %e, "failed to serialize server message");
                false
            }
        }
    }

    /// Queue a close frame and stop reading from the client.
    pub fn close(&self, code: CloseCode, reason: impl Into<String>) {
        let _ = self.send(Outbound::Close {
            code,
            reason: reason.into(),
        });
        self.closed.cancel();
    }

    /// Stop reading from the client without sending a close frame.
    pub fn mark_closed(&self) {
        self.closed.cancel();
    }

    /// Whether the connection is closing.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection starts closing.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag.
    ///
    /// Returns `true` if the client was heard from since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn make_connection(capacity: usize) -> (ClientConnection, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        let session = Arc::new(Session::new("127.0.0.1:5000"));
        (ClientConnection::new(session, tx), rx)
    }

    #[tokio::test]
    async fn send_message_counts_outgoing() {
        let (conn, mut rx) = make_connection(8);
        assert!(conn.send_message(&ServerMessage::Identified {
            negotiated_rpc_version: 1
        }));
        assert_eq!(conn.session().outgoing_messages(), 1);

        let frame = rx.recv().await.unwrap();
        assert_matches!(frame, Outbound::Text(text) if text.contains("\"Identified\""));
    }

    #[tokio::test]
    async fn send_to_full_channel_is_dropped() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.send_text(Arc::new("a".into())));
        assert!(!conn.send_text(Arc::new("b".into())));
        assert_eq!(conn.drop_count(), 1);
        assert_eq!(conn.session().outgoing_messages(), 1);
    }

    #[tokio::test]
    async fn send_to_closed_channel_is_dropped() {
        let (conn, rx) = make_connection(4);
        drop(rx);
        assert!(!conn.send_text(Arc::new("a".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn close_queues_frame_and_cancels() {
        let (conn, mut rx) = make_connection(4);
        assert!(!conn.is_closed());
        conn.close(CloseCode::NotIdentified, "identify first");
        assert!(conn.is_closed());
        conn.closed().await;

        let frame = rx.recv().await.unwrap();
        assert_eq!(
            frame,
            Outbound::Close {
                code: CloseCode::NotIdentified,
                reason: "identify first".into()
            }
        );
    }

    #[test]
    fn mark_alive_and_check() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }

    #[test]
    fn id_is_session_id() {
        let (conn, _rx) = make_connection(1);
        assert_eq!(conn.id(), conn.session().id());
        assert!(conn.age() < Duration::from_secs(5));
    }
}
