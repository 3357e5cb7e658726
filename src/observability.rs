use std::net::SocketAddr;

// ── Request metrics ─────────────────────────────────────────────

/// Counter: session requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "innkeep_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "innkeep_request_duration_seconds";

// ── Connections ─────────────────────────────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "innkeep_connections_active";
pub const CONNECTIONS_TOTAL: &str = "innkeep_connections_total";
/// Counter: connections turned away at the connection limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "innkeep_connections_rejected_total";

// ── Booking outcomes ────────────────────────────────────────────

pub const RESERVATIONS_CONFIRMED_TOTAL: &str = "innkeep_reservations_confirmed_total";

/// Counter: reserve/modify attempts lost to an overlapping reservation.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "innkeep_reservation_conflicts_total";

/// Counter: cancellations. Labels: origin (desk, sweep).
pub const CANCELLATIONS_TOTAL: &str = "innkeep_cancellations_total";

/// Counter: status changes made by the lifecycle sweep. Labels: to.
pub const SWEEP_TRANSITIONS_TOTAL: &str = "innkeep_sweep_transitions_total";

// ── Journal ─────────────────────────────────────────────────────

pub const WAL_FLUSH_DURATION_SECONDS: &str = "innkeep_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "innkeep_wal_flush_batch_size";

pub const WAL_COMPACTIONS_TOTAL: &str = "innkeep_wal_compactions_total";

/// Serve Prometheus metrics on `port`. Does nothing when no port is configured.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
