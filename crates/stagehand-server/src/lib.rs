//! # stagehand-server
//!
//! Axum `WebSocket` server for the Stagehand remote-control protocol.
//!
//! - `WebSocket` gateway: `Hello`/`Identify` handshake, liveness pings, close codes
//! - Request dispatch: validation, handler registry, per-request metrics
//! - Batch execution: serial realtime, frame-gated serial, and parallel
//! - Event broadcasting gated by each session's subscription mask
//! - HTTP endpoints: health check and Prometheus metrics
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod batch;
pub mod config;
pub mod health;
pub mod metrics;
pub mod protocol;
pub mod rpc;
pub mod server;
pub mod shutdown;
pub mod tick;
pub mod websocket;

pub use batch::BatchEngine;
pub use config::ServerConfig;
pub use rpc::dispatcher::{RequestDispatcher, RequestHandler};
pub use server::{ServerError, StagehandServer};
pub use tick::{FrameClock, HostTickSource, TickSource};
