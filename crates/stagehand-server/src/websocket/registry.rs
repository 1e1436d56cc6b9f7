//! Live session registry and event fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use stagehand_core::auth::{self, Credentials};
use stagehand_core::constants::{LATEST_RPC_VERSION, VERSION};
use stagehand_core::messages::AuthenticationChallenge;
use stagehand_core::subscriptions;
use stagehand_core::{CloseCode, ServerMessage, Session};
use tracing::{debug, info, warn};

use super::connection::ClientConnection;
use super::subscriptions::{HighVolumeProducer, HighVolumeTracker};

/// Snapshot of one session, as reported to the host UI.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Session identifier.
    pub id: String,
    /// Peer address.
    pub remote_address: String,
    /// RFC 3339 connection timestamp.
    pub connected_at: String,
    /// Seconds since the connection was accepted.
    pub duration_secs: u64,
    /// Messages received.
    pub incoming_messages: u64,
    /// Messages sent.
    pub outgoing_messages: u64,
    /// Whether `Identify` completed.
    pub is_identified: bool,
}

/// Every open connection, keyed by session ID.
pub struct SessionRegistry {
    connections: RwLock<HashMap<String, Arc<ClientConnection>>>,
    credentials: Option<Credentials>,
    high_volume: HighVolumeTracker,
}

impl SessionRegistry {
    /// Create a registry. `credentials` turns on authentication.
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            credentials,
            high_volume: HighVolumeTracker::new(None),
        }
    }

    /// Attach the host's high-volume event producer.
    #[must_use]
    pub fn with_high_volume_producer(mut self, producer: Arc<dyn HighVolumeProducer>) -> Self {
        self.high_volume = HighVolumeTracker::new(Some(producer));
        self
    }

    /// Whether new sessions must authenticate.
    pub fn authentication_required(&self) -> bool {
        self.credentials.is_some()
    }

    /// High-volume subscriber counts.
    pub fn high_volume(&self) -> &HighVolumeTracker {
        &self.high_volume
    }

    /// Create the session for a freshly accepted connection.
    ///
    /// When authentication is on, the session gets the server secret and a
    /// fresh challenge.
    pub fn create_session(&self, remote_address: impl Into<String>) -> Arc<Session> {
        let session = Session::new(remote_address);
        if let Some(credentials) = &self.credentials {
            session.require_authentication(credentials.secret.clone(), auth::generate_challenge());
        }
        Arc::new(session)
    }

    /// The `Hello` greeting for `session`.
    pub fn hello_message(&self, session: &Session) -> ServerMessage {
        let authentication = match &self.credentials {
            Some(credentials) if session.authentication_required() => Some(AuthenticationChallenge {
                challenge: session.challenge(),
                salt: credentials.salt.clone(),
            }),
            _ => None,
        };
        ServerMessage::Hello {
            server_version: VERSION.into(),
            rpc_version: LATEST_RPC_VERSION,
            authentication,
        }
    }

    /// Register an accepted connection.
    pub fn add(&self, connection: Arc<ClientConnection>) {
        let _ = self
            .connections
            .write()
            .insert(connection.id().to_owned(), connection);
    }

    /// Remove a connection and release its high-volume subscriptions.
    pub fn remove(&self, session_id: &str) -> Option<Arc<ClientConnection>> {
        let connection = self.connections.write().remove(session_id)?;
        {
            let session = connection.session();
            let _guard = session.lock_operation();
            if session.is_identified() {
                self.high_volume.unsubscribe(session.event_subscriptions());
            }
        }
        Some(connection)
    }

    /// Whether the session is still registered.
    pub fn contains(&self, session_id: &str) -> bool {
        self.connections.read().contains_key(session_id)
    }

    /// Look up a connection.
    pub fn get(&self, session_id: &str) -> Option<Arc<ClientConnection>> {
        self.connections.read().get(session_id).cloned()
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Number of sessions that completed `Identify`.
    pub fn identified_count(&self) -> usize {
        self.connections
            .read()
            .values()
            .filter(|c| c.session().is_identified())
            .count()
    }

    /// Send an event to every identified session subscribed to
    /// `required_intent` and speaking at least `min_rpc_version`.
    ///
    /// Returns the number of recipients.
    pub fn broadcast_event(
        &self,
        required_intent: u64,
        event_type: &str,
        event_data: Option<Value>,
        min_rpc_version: u8,
    ) -> usize {
        let message = ServerMessage::Event {
            event_type: event_type.to_owned(),
            event_intent: required_intent,
            event_data,
        };
        let json = match message.to_json() {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(event_type, error = %e, "failed to serialize event");
                return 0;
            }
        };

        let conns = self.connections.read();
        let mut recipients = 0;
        for conn in conns.values() {
            let session = conn.session();
            if !session.is_identified()
                || !subscriptions::intersects(session.event_subscriptions(), required_intent)
                || session.rpc_version() < min_rpc_version
            {
                continue;
            }
            if conn.send_text(json.clone()) {
                recipients += 1;
            } else {
                warn!(session_id = %conn.id(), event_type, "failed to send event to client");
            }
        }
        counter!(crate::metrics::EVENTS_BROADCAST_TOTAL, "event_type" => event_type.to_owned())
            .increment(1);
        debug!(event_type, recipients, "broadcast event");
        recipients
    }

    /// Snapshot every session.
    pub fn sessions(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .connections
            .read()
            .values()
            .map(|conn| {
                let session = conn.session();
                SessionSummary {
                    id: session.id().to_owned(),
                    remote_address: session.remote_address().to_owned(),
                    connected_at: session.connected_at().to_rfc3339(),
                    duration_secs: conn.age().as_secs(),
                    incoming_messages: session.incoming_messages(),
                    outgoing_messages: session.outgoing_messages(),
                    is_identified: session.is_identified(),
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Close a session with [`CloseCode::SessionInvalidated`].
    ///
    /// Returns `false` if no such session is connected.
    pub fn invalidate(&self, session_id: &str) -> bool {
        let Some(conn) = self.get(session_id) else {
            return false;
        };
        info!(session_id, "invalidating session");
        conn.close(
            CloseCode::SessionInvalidated,
            "Your session has been invalidated.",
        );
        true
    }
}
