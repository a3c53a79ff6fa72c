use std::net::SocketAddr;

// ── Booking lifecycle (request-driven) ──────────────────────────

/// Counter: reservation attempts. Labels: outcome (created, capacity_exceeded, invalid).
pub const RESERVATIONS_TOTAL: &str = "rentline_reservations_total";

/// Counter: paid-order lines processed. Labels: path (already_processed, by_reference, date_match, direct).
pub const CONFIRMATIONS_TOTAL: &str = "rentline_confirmations_total";

/// Counter: bookings cancelled. Labels: trigger (order, item_removed).
pub const CANCELLATIONS_TOTAL: &str = "rentline_cancellations_total";

/// Counter: bookings marked returned.
pub const RETURNS_TOTAL: &str = "rentline_returns_total";

/// Counter: availability evaluations. Labels: result (available, unavailable).
pub const AVAILABILITY_CHECKS_TOTAL: &str = "rentline_availability_checks_total";

// ── Housekeeping ────────────────────────────────────────────────

/// Counter: expired holds hard-deleted by sweeps.
pub const EXPIRED_PURGED_TOTAL: &str = "rentline_expired_purged_total";

/// Histogram: sweep duration in seconds.
pub const SWEEP_DURATION_SECONDS: &str = "rentline_sweep_duration_seconds";

/// Counter: rental item cache lookups. Labels: result (hit, miss).
pub const ITEM_CACHE_TOTAL: &str = "rentline_item_cache_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL append+fsync duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rentline_wal_flush_duration_seconds";

/// Histogram: records per WAL append.
pub const WAL_FLUSH_BATCH_SIZE: &str = "rentline_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
/// A failed install is logged and the process keeps running without metrics.
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
