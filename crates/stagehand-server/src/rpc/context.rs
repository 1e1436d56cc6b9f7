//! Dependencies handed to every request handler.

use std::sync::Arc;
use std::time::Instant;

use stagehand_core::Session;

use crate::shutdown::ShutdownCoordinator;
use crate::tick::TickSource;
use crate::websocket::registry::SessionRegistry;

/// Server-wide services shared by every connection.
pub struct ServiceContext {
    /// Open connections and event fan-out.
    pub sessions: Arc<SessionRegistry>,
    /// Host render loop. `None` disables frame-gated batches.
    pub tick_source: Option<Arc<dyn TickSource>>,
    /// Server shutdown signal.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started (for uptime calculation).
    pub server_start_time: Instant,
}

impl ServiceContext {
    /// Build a context with a fresh shutdown coordinator.
    pub fn new(sessions: Arc<SessionRegistry>, tick_source: Option<Arc<dyn TickSource>>) -> Self {
        Self {
            sessions,
            tick_source,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            server_start_time: Instant::now(),
        }
    }
}

/// Context for one request: the calling session plus server services.
///
/// Cheap to clone; batch workers each take their own copy.
#[derive(Clone)]
pub struct RequestContext {
    /// Session that sent the request.
    pub session: Arc<Session>,
    /// Server-wide services.
    pub services: Arc<ServiceContext>,
}

impl RequestContext {
    /// Pair a session with the server services.
    pub fn new(session: Arc<Session>, services: Arc<ServiceContext>) -> Self {
        Self { session, services }
    }
}
