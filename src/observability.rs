use std::net::SocketAddr;

use crate::protocol::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "coiffe_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "coiffe_request_duration_seconds";

/// Counter: appointments committed.
pub const BOOKINGS_TOTAL: &str = "coiffe_bookings_total";

/// Counter: bookings rejected because the slot was taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "coiffe_booking_conflicts_total";

/// Histogram: days scanned per availability resolution.
pub const AVAILABILITY_DAYS_SCANNED: &str = "coiffe_availability_days_scanned";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "coiffe_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "coiffe_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "coiffe_connections_rejected_total";

/// Counter: failed password handshakes.
pub const AUTH_FAILURES_TOTAL: &str = "coiffe_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "coiffe_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "coiffe_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a request variant to a short label for metrics.
pub fn op_label(req: &Request) -> &'static str {
    match req {
        Request::CreateSalon { .. } => "create_salon",
        Request::RegisterClient { .. } => "register_client",
        Request::HireStaff { .. } => "hire_staff",
        Request::AddService { .. } => "add_service",
        Request::SetServiceStatus { .. } => "set_service_status",
        Request::AddWindow { .. } => "add_window",
        Request::UpdateWindow { .. } => "update_window",
        Request::RemoveWindow { .. } => "remove_window",
        Request::Availability { .. } => "availability",
        Request::Book { .. } => "book",
        Request::Cancel { .. } => "cancel",
        Request::ListWindows { .. } => "list_windows",
        Request::ListAppointments { .. } => "list_appointments",
    }
}
