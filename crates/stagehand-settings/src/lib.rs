//! # stagehand-settings
//!
//! Configuration management with layered sources for the Stagehand server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`StagehandSettings::default()`]
//! 2. **User file** — `~/.stagehand/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `STAGEHAND_*` overrides (highest priority)
//!
//! The server binary layers its command-line flags on top.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path,
    load_settings_with_env, settings_path,
};
pub use types::*;
