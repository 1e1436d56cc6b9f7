//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Call once at startup before anything records. The returned handle
/// renders the `/metrics` endpoint.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Requests dispatched (counter, labels: `request_type`).
pub const REQUESTS_TOTAL: &str = "requests_total";
/// Requests that did not succeed (counter, labels: `request_type`, `status`).
pub const REQUEST_ERRORS_TOTAL: &str = "request_errors_total";
/// Handler duration (histogram, labels: `request_type`).
pub const REQUEST_DURATION_SECONDS: &str = "request_duration_seconds";
/// Batches executed (counter, labels: `execution_type`).
pub const BATCHES_TOTAL: &str = "batches_total";
/// Batch wall-clock duration (histogram, labels: `execution_type`).
pub const BATCH_DURATION_SECONDS: &str = "batch_duration_seconds";
/// Connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Connections currently open (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Upgrades refused at the connection limit (counter).
pub const WS_CONNECTIONS_REJECTED_TOTAL: &str = "ws_connections_rejected_total";
/// Connections closed by the server with a protocol close code (counter, labels: `code`).
pub const WS_CLOSES_TOTAL: &str = "ws_closes_total";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Outbound messages dropped on a full channel (counter).
pub const WS_OUTBOUND_DROPS_TOTAL: &str = "ws_outbound_drops_total";
/// Events fanned out (counter, labels: `event_type`).
pub const EVENTS_BROADCAST_TOTAL: &str = "events_broadcast_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            REQUESTS_TOTAL,
            REQUEST_ERRORS_TOTAL,
            REQUEST_DURATION_SECONDS,
            BATCHES_TOTAL,
            BATCH_DURATION_SECONDS,
            WS_CONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_CONNECTIONS_REJECTED_TOTAL,
            WS_CLOSES_TOTAL,
            WS_CONNECTION_DURATION_SECONDS,
            WS_OUTBOUND_DROPS_TOTAL,
            EVENTS_BROADCAST_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
