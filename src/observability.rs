use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "rentline_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "rentline_query_duration_seconds";

/// Counter: reservation writes or checks refused for lack of stock.
pub const AVAILABILITY_VIOLATIONS_TOTAL: &str = "rentline_availability_violations_total";

/// Counter: writes aborted because a competing write won the race.
pub const CONCURRENT_CONFLICTS_TOTAL: &str = "rentline_concurrent_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "rentline_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "rentline_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "rentline_connections_rejected_total";

/// Counter: connections that ended in an error, startup and auth failures included.
pub const CONNECTION_ERRORS_TOTAL: &str = "rentline_connection_errors_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rentline_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "rentline_wal_flush_batch_size";

/// Install the fmt subscriber, filtered by `RUST_LOG` (default `info`).
/// Later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Install the Prometheus exporter on `port`. No-op if port is None; a
/// failed install is logged and the server carries on without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter on {addr}: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::UpsertItem { update: false, .. } => "insert_item",
        Command::UpsertItem { update: true, .. } => "upsert_item",
        Command::DeleteItem { .. } => "delete_item",
        Command::UpsertReservation { update: false, .. } => "insert_reservation",
        Command::UpsertReservation { update: true, .. } => "upsert_reservation",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::InsertPayment { .. } => "insert_payment",
        Command::SelectItems => "select_items",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectPayments { .. } => "select_payments",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectDaySummary { .. } => "select_day_summary",
        Command::SelectCalendar { .. } => "select_calendar",
    }
}
