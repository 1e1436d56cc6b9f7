//! Settings schema.
//!
//! Field names are camelCase on disk. Every struct defaults field by field,
//! so a partial settings file is always valid.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StagehandSettings {
    /// WebSocket server settings.
    pub server: ServerSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
    /// Standalone frame clock settings.
    pub frame_clock: FrameClockSettings,
}

impl StagehandSettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConnections must be positive".into(),
            ));
        }
        if self.server.max_message_size == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxMessageSize must be positive".into(),
            ));
        }
        if self.server.ping_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.pingIntervalSecs must be positive".into(),
            ));
        }
        if !(1..=MAX_FRAMES_PER_SECOND).contains(&self.frame_clock.frames_per_second) {
            return Err(SettingsError::InvalidValue(format!(
                "frameClock.framesPerSecond must be within 1..={MAX_FRAMES_PER_SECOND}"
            )));
        }
        Ok(())
    }
}

/// Highest accepted frame clock rate.
pub const MAX_FRAMES_PER_SECOND: u32 = 240;

/// WebSocket server settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Whether clients must authenticate in `Identify`.
    pub auth_required: bool,
    /// Server password. Generated at startup when auth is required and unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Connections accepted at once. Further upgrades get `503`.
    pub max_connections: usize,
    /// Largest accepted WebSocket message, in bytes.
    pub max_message_size: usize,
    /// Seconds between server pings.
    pub ping_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4455,
            auth_required: true,
            password: None,
            max_connections: 64,
            max_message_size: 16 * 1024 * 1024,
            ping_interval_secs: 30,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level, in `EnvFilter` syntax.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Frame clock used when no host render loop drives frame batches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FrameClockSettings {
    /// Run the clock. When off, frame batches are rejected.
    pub enabled: bool,
    /// Ticks per second.
    pub frames_per_second: u32,
}

impl Default for FrameClockSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            frames_per_second: 60,
        }
    }
}
