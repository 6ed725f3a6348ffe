use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "staybook_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "staybook_request_duration_seconds";

// ── Booking lifecycle ───────────────────────────────────────────

/// Counter: bookings persisted as pending.
pub const BOOKINGS_CREATED_TOTAL: &str = "staybook_bookings_created_total";

/// Counter: booking requests refused at admission. Labels: reason.
pub const BOOKINGS_REFUSED_TOTAL: &str = "staybook_bookings_refused_total";

/// Counter: admin decisions applied. Labels: decision.
pub const DECISIONS_TOTAL: &str = "staybook_decisions_total";

/// Counter: approvals whose pre-lock snapshot was stale by commit time.
pub const TXN_STALE_SNAPSHOTS_TOTAL: &str = "staybook_txn_stale_snapshots_total";

/// Counter: notifications dispatched. Labels: kind.
pub const NOTIFICATIONS_TOTAL: &str = "staybook_notifications_total";

/// Counter: notifications the notifier failed to deliver. Labels: kind.
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "staybook_notifications_failed_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "staybook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "staybook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "staybook_connections_rejected_total";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "staybook_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (records per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "staybook_journal_flush_batch_size";

/// Install the global tracing subscriber. Filter comes from `RUST_LOG`,
/// defaulting to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init_metrics(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
