//! Per-connection protocol state.
//!
//! Every field is individually synchronized so handlers, the event
//! broadcaster and the connection task can read a session concurrently.
//! Only the handshake takes the operation lock.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};

use crate::constants::LATEST_RPC_VERSION;
use crate::subscriptions;

/// State of one connected client.
pub struct Session {
    id: String,
    remote_address: String,
    connected_at: DateTime<Utc>,
    incoming_messages: AtomicU64,
    outgoing_messages: AtomicU64,
    authentication_required: AtomicBool,
    secret: Mutex<String>,
    challenge: Mutex<String>,
    rpc_version: AtomicU8,
    identified: AtomicBool,
    ignore_invalid_messages: AtomicBool,
    ignore_non_fatal_request_checks: AtomicBool,
    event_subscriptions: AtomicU64,
    operation_lock: Mutex<()>,
}

impl Session {
    /// Create an unidentified session for a client at `remote_address`.
    pub fn new(remote_address: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            remote_address: remote_address.into(),
            connected_at: Utc::now(),
            incoming_messages: AtomicU64::new(0),
            outgoing_messages: AtomicU64::new(0),
            authentication_required: AtomicBool::new(false),
            secret: Mutex::new(String::new()),
            challenge: Mutex::new(String::new()),
            rpc_version: AtomicU8::new(LATEST_RPC_VERSION),
            identified: AtomicBool::new(false),
            ignore_invalid_messages: AtomicBool::new(false),
            ignore_non_fatal_request_checks: AtomicBool::new(false),
            event_subscriptions: AtomicU64::new(subscriptions::ALL),
            operation_lock: Mutex::new(()),
        }
    }

    /// Unique session ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Peer address as reported by the transport.
    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    /// When the connection was accepted.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Count one received message. Returns the new total.
    pub fn increment_incoming_messages(&self) -> u64 {
        self.incoming_messages.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Count one sent message. Returns the new total.
    pub fn increment_outgoing_messages(&self) -> u64 {
        self.outgoing_messages.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Messages received from the client.
    pub fn incoming_messages(&self) -> u64 {
        self.incoming_messages.load(Ordering::Relaxed)
    }

    /// Messages sent to the client.
    pub fn outgoing_messages(&self) -> u64 {
        self.outgoing_messages.load(Ordering::Relaxed)
    }

    /// Whether `Identify` must carry an authentication string.
    pub fn authentication_required(&self) -> bool {
        self.authentication_required.load(Ordering::Relaxed)
    }

    /// Require authentication with the given secret and challenge.
    pub fn require_authentication(&self, secret: String, challenge: String) {
        *self.secret.lock() = secret;
        *self.challenge.lock() = challenge;
        self.authentication_required.store(true, Ordering::Relaxed);
    }

    /// Server secret derived from the password and salt.
    pub fn secret(&self) -> String {
        self.secret.lock().clone()
    }

    /// Per-connection authentication challenge.
    pub fn challenge(&self) -> String {
        self.challenge.lock().clone()
    }

    /// Negotiated protocol revision.
    pub fn rpc_version(&self) -> u8 {
        self.rpc_version.load(Ordering::Relaxed)
    }

    /// Record the negotiated protocol revision.
    pub fn set_rpc_version(&self, version: u8) {
        self.rpc_version.store(version, Ordering::Relaxed);
    }

    /// Whether a valid `Identify` has been processed.
    pub fn is_identified(&self) -> bool {
        self.identified.load(Ordering::Acquire)
    }

    /// Mark the session identified. There is no way back.
    pub fn mark_identified(&self) {
        self.identified.store(true, Ordering::Release);
    }

    /// Whether malformed messages are dropped instead of closing.
    pub fn ignore_invalid_messages(&self) -> bool {
        self.ignore_invalid_messages.load(Ordering::Relaxed)
    }

    /// Set [`Self::ignore_invalid_messages`].
    pub fn set_ignore_invalid_messages(&self, ignore: bool) {
        self.ignore_invalid_messages.store(ignore, Ordering::Relaxed);
    }

    /// Whether non-fatal request checks are waived.
    pub fn ignore_non_fatal_request_checks(&self) -> bool {
        self.ignore_non_fatal_request_checks.load(Ordering::Relaxed)
    }

    /// Set [`Self::ignore_non_fatal_request_checks`].
    pub fn set_ignore_non_fatal_request_checks(&self, ignore: bool) {
        self.ignore_non_fatal_request_checks
            .store(ignore, Ordering::Relaxed);
    }

    /// Event categories the client receives.
    pub fn event_subscriptions(&self) -> u64 {
        self.event_subscriptions.load(Ordering::Relaxed)
    }

    /// Replace the subscription mask. Returns the previous mask.
    pub fn set_event_subscriptions(&self, mask: u64) -> u64 {
        self.event_subscriptions.swap(mask, Ordering::Relaxed)
    }

    /// Serialize handshake processing for this session.
    pub fn lock_operation(&self) -> MutexGuard<'_, ()> {
        self.operation_lock.lock()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("remote_address", &self.remote_address)
            .field("identified", &self.is_identified())
            .field("rpc_version", &self.rpc_version())
            .field("event_subscriptions", &self.event_subscriptions())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_unidentified() {
        let session = Session::new("10.0.0.2:4455");
        assert!(!session.is_identified());
        assert!(!session.authentication_required());
        assert_eq!(session.remote_address(), "10.0.0.2:4455");
        assert_eq!(session.rpc_version(), LATEST_RPC_VERSION);
        assert_eq!(session.event_subscriptions(), subscriptions::ALL);
    }

    #[test]
    fn ids_are_unique() {
        let a = Session::new("a");
        let b = Session::new("b");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn counters_increment() {
        let session = Session::new("a");
        assert_eq!(session.increment_incoming_messages(), 1);
        assert_eq!(session.increment_incoming_messages(), 2);
        assert_eq!(session.increment_outgoing_messages(), 1);
        assert_eq!(session.incoming_messages(), 2);
        assert_eq!(session.outgoing_messages(), 1);
    }

    #[test]
    fn require_authentication_stores_credentials() {
        let session = Session::new("a");
        session.require_authentication("secret".into(), "challenge".into());
        assert!(session.authentication_required());
        assert_eq!(session.secret(), "secret");
        assert_eq!(session.challenge(), "challenge");
    }

    #[test]
    fn identification_is_one_way() {
        let session = Session::new("a");
        session.mark_identified();
        session.mark_identified();
        assert!(session.is_identified());
    }

    #[test]
    fn subscription_swap_returns_previous() {
        let session = Session::new("a");
        let previous = session.set_event_subscriptions(subscriptions::GENERAL);
        assert_eq!(previous, subscriptions::ALL);
        assert_eq!(session.event_subscriptions(), subscriptions::GENERAL);
    }

    #[test]
    fn flags_toggle() {
        let session = Session::new("a");
        session.set_ignore_invalid_messages(true);
        session.set_ignore_non_fatal_request_checks(true);
        assert!(session.ignore_invalid_messages());
        assert!(session.ignore_non_fatal_request_checks());
    }

    #[test]
    fn operation_lock_released_on_drop() {
        let session = Session::new("a");
        {
            let _guard = session.lock_operation();
        }
        let _guard = session.lock_operation();
    }
}
