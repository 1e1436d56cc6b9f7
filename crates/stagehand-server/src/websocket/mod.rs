//! WebSocket transport: connections, session registry, subscriptions and
//! the per-connection session loop.

pub mod connection;
pub mod registry;
pub mod session;
pub mod subscriptions;
