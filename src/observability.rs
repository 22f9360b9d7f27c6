use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "motorpool_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "motorpool_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "motorpool_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "motorpool_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "motorpool_connections_rejected_total";

/// Gauge: number of loaded fleets (one engine each).
pub const TENANTS_ACTIVE: &str = "motorpool_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "motorpool_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "motorpool_wal_flush_batch_size";

// ── Domain ──────────────────────────────────────────────────────

/// Counter: reservation status changes. Labels: to.
pub const RESERVATION_TRANSITIONS_TOTAL: &str = "motorpool_reservation_transitions_total";

/// Counter: creates and updates refused because the slot was taken.
pub const CONFLICTS_TOTAL: &str = "motorpool_conflicts_total";

/// Histogram: scheduler scan duration in seconds.
pub const SCHEDULER_TICK_DURATION_SECONDS: &str = "motorpool_scheduler_tick_duration_seconds";

/// Counter: scheduler actions. Labels: action, outcome.
pub const SCHEDULER_OUTCOMES_TOTAL: &str = "motorpool_scheduler_outcomes_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertVehicle { .. } => "insert_vehicle",
        Command::InsertDriver { .. } => "insert_driver",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::UpdateReservation { .. } => "update_reservation",
        Command::CancelReservation { .. } => "cancel_reservation",
        Command::Transition { to, .. } => match to {
            crate::model::ReservationStatus::Active => "activate_reservation",
            crate::model::ReservationStatus::Completed => "complete_reservation",
            crate::model::ReservationStatus::Cancelled => "cancel_reservation",
            crate::model::ReservationStatus::Approved => "approve_reservation",
            crate::model::ReservationStatus::Rejected => "reject_reservation",
            crate::model::ReservationStatus::Pending => "transition",
        },
        Command::Reassign { .. } => "reassign_vehicle",
        Command::SetMaintenance { .. } => "set_maintenance",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectActiveReservations => "select_active_reservations",
        Command::SelectVehicles => "select_vehicles",
        Command::SelectDrivers => "select_drivers",
        Command::SelectConflicts { .. } => "select_conflicts",
        Command::SelectAvailableVehicles { .. } => "select_available_vehicles",
    }
}
