//! # stagehand
//!
//! Stagehand server binary — loads settings, wires the request handlers and
//! frame clock together, and serves the remote-control `WebSocket`.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use stagehand_core::auth::{self, Credentials};
use stagehand_server::config::ServerConfig;
use stagehand_server::rpc::context::ServiceContext;
use stagehand_server::rpc::dispatcher::RequestDispatcher;
use stagehand_server::server::StagehandServer;
use stagehand_server::tick::{FrameClock, TickSource};
use stagehand_server::websocket::registry::SessionRegistry;
use stagehand_settings::{ServerSettings, StagehandSettings};

/// Stagehand remote-control server.
#[derive(Parser, Debug)]
#[command(name = "stagehand", about = "Stagehand remote-control server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Password clients must authenticate with.
    #[arg(long)]
    password: Option<String>,

    /// Accept clients without authentication.
    #[arg(long)]
    no_auth: bool,

    /// Path to the settings file (defaults to `~/.stagehand/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Frame clock rate. 0 disables frame-gated batches.
    #[arg(long)]
    frame_rate: Option<u32>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    /// Layer command-line flags over loaded settings.
    fn apply(&self, settings: &mut StagehandSettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(ref password) = self.password {
            settings.server.password = Some(password.clone());
        }
        if self.no_auth {
            settings.server.auth_required = false;
        }
        match self.frame_rate {
            Some(0) => settings.frame_clock.enabled = false,
            Some(fps) => {
                settings.frame_clock.enabled = true;
                settings.frame_clock.frames_per_second = fps;
            }
            None => {}
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

/// Credentials for the configured password, generating one when auth is
/// required but none is set.
///
/// Returns the credentials and, if one was generated, the new password.
fn resolve_credentials(server: &ServerSettings) -> (Option<Credentials>, Option<String>) {
    if !server.auth_required {
        return (None, None);
    }
    match server.password.as_deref().filter(|p| !p.is_empty()) {
        Some(password) => (Some(Credentials::from_password(password)), None),
        None => {
            let generated = auth::generate_password();
            (Some(Credentials::from_password(&generated)), Some(generated))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli
        .settings
        .clone()
        .unwrap_or_else(stagehand_settings::settings_path);
    let mut settings = stagehand_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings after applying flags")?;

    if settings.logging.json {
        stagehand_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        stagehand_core::logging::init_subscriber(&settings.logging.level);
    }
    tracing::info!(path = %settings_path.display(), "settings loaded");

    let (credentials, generated) = resolve_credentials(&settings.server);
    if let Some(ref password) = generated {
        tracing::warn!(%password, "authentication required but no password set, generated one");
    }
    if credentials.is_none() {
        tracing::warn!("authentication disabled, any client may connect");
    }

    let clock = if settings.frame_clock.enabled {
        Some(Arc::new(
            FrameClock::start(settings.frame_clock.frames_per_second)
                .context("Failed to start frame clock")?,
        ))
    } else {
        tracing::info!("frame clock disabled, frame batches will be rejected");
        None
    };
    let tick_source = clock
        .clone()
        .map(|clock| -> Arc<dyn TickSource> { clock });

    let sessions = Arc::new(SessionRegistry::new(credentials));
    let services = Arc::new(ServiceContext::new(sessions, tick_source));

    let mut dispatcher = RequestDispatcher::new();
    stagehand_server::rpc::handlers::register_all(&mut dispatcher);
    tracing::info!(request_types = dispatcher.request_types().len(), "request handlers registered");

    let metrics_handle = stagehand_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let config = ServerConfig::from(&settings.server);
    let server = StagehandServer::new(config, dispatcher, services, metrics_handle);
    let (addr, handle) = server.listen().await.context("Failed to start server")?;
    tracing::info!(%addr, "stagehand ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    server.shutdown().graceful_shutdown(vec![handle], None).await;
    if let Some(clock) = clock {
        clock.stop();
    }
    tracing::info!("stagehand stopped");
    Ok(())
}
