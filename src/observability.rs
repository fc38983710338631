use std::net::SocketAddr;

// ── Request metrics ─────────────────────────────────────────────

/// Counter: total HTTP requests. Labels: route, status.
pub const REQUESTS_TOTAL: &str = "perch_requests_total";

/// Histogram: request latency in seconds. Labels: route.
pub const REQUEST_DURATION_SECONDS: &str = "perch_request_duration_seconds";

/// Counter: rejected bearer tokens.
pub const AUTH_FAILURES_TOTAL: &str = "perch_auth_failures_total";

// ── Booking lifecycle ───────────────────────────────────────────

pub const BOOKINGS_CREATED_TOTAL: &str = "perch_bookings_created_total";

/// Counter: creates rejected because the seat was already booked.
pub const BOOKING_CONFLICTS_TOTAL: &str = "perch_booking_conflicts_total";

pub const BOOKINGS_CANCELLED_TOTAL: &str = "perch_bookings_cancelled_total";

/// Counter: bookings flipped inactive by the expiration sweep.
pub const BOOKINGS_EXPIRED_TOTAL: &str = "perch_bookings_expired_total";

// ── WAL ─────────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "perch_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "perch_wal_flush_batch_size";

/// Start the Prometheus exporter if a port is configured.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
