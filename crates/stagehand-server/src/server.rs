//! `StagehandServer` — Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_CONNECTIONS_REJECTED_TOTAL;
use crate::protocol::ProtocolHandler;
use crate::rpc::context::ServiceContext;
use crate::rpc::dispatcher::RequestDispatcher;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::registry::SessionRegistry;
use crate::websocket::session::{SessionOptions, run_ws_session};

/// Errors raised while starting the listener.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying socket error.
        source: std::io::Error,
    },
    /// The bound socket did not report its address.
    #[error("failed to read local address: {0}")]
    LocalAddr(std::io::Error),
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Protocol state machine shared by all connections.
    pub protocol: Arc<ProtocolHandler>,
    /// Server-wide services.
    pub services: Arc<ServiceContext>,
    /// Prometheus exporter handle for `/metrics`.
    pub metrics: PrometheusHandle,
    /// Connection cap; upgrades beyond it get `503`.
    pub max_connections: usize,
    /// Largest accepted WebSocket message.
    pub max_message_size: usize,
    /// Ping/pong settings for each connection.
    pub session_options: SessionOptions,
}

/// The main Stagehand server.
pub struct StagehandServer {
    config: ServerConfig,
    dispatcher: Arc<RequestDispatcher>,
    services: Arc<ServiceContext>,
    protocol: Arc<ProtocolHandler>,
    metrics: PrometheusHandle,
}

impl StagehandServer {
    /// Create a new server.
    pub fn new(
        config: ServerConfig,
        dispatcher: RequestDispatcher,
        services: Arc<ServiceContext>,
        metrics: PrometheusHandle,
    ) -> Self {
        let dispatcher = Arc::new(dispatcher);
        let protocol = Arc::new(ProtocolHandler::new(dispatcher.clone(), services.clone()));
        Self {
            config,
            dispatcher,
            services,
            protocol,
            metrics,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            protocol: self.protocol.clone(),
            services: self.services.clone(),
            metrics: self.metrics.clone(),
            max_connections: self.config.max_connections,
            max_message_size: self.config.max_message_size,
            session_options: SessionOptions {
                ping_interval: Duration::from_secs(self.config.ping_interval_secs.max(1)),
                pong_timeout: Duration::from_secs(self.config.pong_timeout_secs.max(1)),
            },
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the listener and serve until the shutdown token fires.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let token = self.services.shutdown.token();

        info!(%local_addr, "stagehand server listening");
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server terminated with error");
            }
        });

        Ok((local_addr, handle))
    }

    /// Get the session registry.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.services.sessions
    }

    /// Get the shared services.
    pub fn services(&self) -> &Arc<ServiceContext> {
        &self.services
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.services.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the request dispatcher.
    pub fn dispatcher(&self) -> &Arc<RequestDispatcher> {
        &self.dispatcher
    }
}

/// GET /ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let open = state.services.sessions.connection_count();
    if open >= state.max_connections {
        warn!(%remote_addr, open, max = state.max_connections, "connection limit reached");
        counter!(WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    }

    let protocol = state.protocol.clone();
    let registry = state.services.sessions.clone();
    let shutdown = state.services.shutdown.token();
    let options = state.session_options;
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| {
            run_ws_session(socket, remote_addr, protocol, registry, options, shutdown)
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let sessions = &state.services.sessions;
    Json(health::health_check(
        state.services.server_start_time,
        sessions.connection_count(),
        sessions.identified_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    crate::metrics::render(&state.metrics)
}
