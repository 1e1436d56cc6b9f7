//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open WebSocket connections.
    pub connections: usize,
    /// Connections that completed `Identify`.
    pub identified_sessions: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize, identified: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        version: stagehand_core::constants::VERSION.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        identified_sessions: identified,
    }
}
