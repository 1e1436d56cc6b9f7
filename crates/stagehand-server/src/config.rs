//! Server configuration.

use serde::{Deserialize, Serialize};
use stagehand_settings::ServerSettings;

/// Runtime configuration for the WebSocket server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Seconds between server Ping frames.
    pub ping_interval_secs: u64,
    /// Seconds without a Pong before the connection is dropped.
    pub pong_timeout_secs: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 64,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            max_connections: settings.max_connections,
            ping_interval_secs: settings.ping_interval_secs,
            pong_timeout_secs: settings.ping_interval_secs.saturating_mul(2),
            max_message_size: settings.max_message_size,
        }
    }
}
