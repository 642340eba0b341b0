//! Metrics collection and export for Rendezvous.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use rendezvous_core::{RegistryStats, SweepReport};
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONTROL_SESSIONS_TOTAL: &str = "rendezvous_control_sessions_total";
    pub const CONTROL_SESSIONS_ACTIVE: &str = "rendezvous_control_sessions_active";
    pub const HANDSHAKES_TOTAL: &str = "rendezvous_handshakes_total";
    pub const DATAGRAMS_TOTAL: &str = "rendezvous_datagrams_total";
    pub const RELAY_DELIVERIES_TOTAL: &str = "rendezvous_relay_deliveries_total";
    pub const EVICTIONS_TOTAL: &str = "rendezvous_evictions_total";
    pub const ROOMS_ACTIVE: &str = "rendezvous_rooms_active";
    pub const MEMBERS_ACTIVE: &str = "rendezvous_members_active";
    pub const DISPATCH_SECONDS: &str = "rendezvous_dispatch_seconds";
    pub const ERRORS_TOTAL: &str = "rendezvous_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONTROL_SESSIONS_TOTAL,
        "Total number of control connections since server start"
    );
    metrics::describe_gauge!(
        names::CONTROL_SESSIONS_ACTIVE,
        "Current number of open control connections"
    );
    metrics::describe_counter!(
        names::HANDSHAKES_TOTAL,
        "Create/join handshakes by outcome and role"
    );
    metrics::describe_counter!(
        names::DATAGRAMS_TOTAL,
        "Data-channel datagrams by outcome"
    );
    metrics::describe_counter!(
        names::RELAY_DELIVERIES_TOTAL,
        "Relay frames delivered to room members"
    );
    metrics::describe_counter!(names::EVICTIONS_TOTAL, "Memberships evicted, by cause");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of rooms");
    metrics::describe_gauge!(names::MEMBERS_ACTIVE, "Current number of memberships");
    metrics::describe_histogram!(
        names::DISPATCH_SECONDS,
        "Datagram dispatch latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a finished handshake.
pub fn record_handshake(outcome: &'static str, role: &'static str) {
    counter!(names::HANDSHAKES_TOTAL, "outcome" => outcome, "role" => role).increment(1);
}

/// Record a dispatched datagram.
pub fn record_datagram(outcome: &'static str, seconds: f64) {
    counter!(names::DATAGRAMS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::DISPATCH_SECONDS).record(seconds);
}

/// Record relay deliveries.
pub fn record_deliveries(count: usize) {
    counter!(names::RELAY_DELIVERIES_TOTAL).increment(count as u64);
}

/// Record evicted memberships.
pub fn record_evictions(cause: &'static str, count: usize) {
    if count > 0 {
        counter!(names::EVICTIONS_TOTAL, "cause" => cause).increment(count as u64);
    }
}

/// Record the result of an idle sweep.
pub fn record_sweep(report: &SweepReport) {
    record_evictions("idle", report.evicted.len());
}

/// Update room and member gauges.
pub fn set_registry_stats(stats: RegistryStats) {
    gauge!(names::ROOMS_ACTIVE).set(stats.room_count as f64);
    gauge!(names::MEMBERS_ACTIVE).set(stats.member_count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that tracks an open control session.
pub struct SessionMetricsGuard;

impl SessionMetricsGuard {
    /// Create a new metrics guard, recording a session.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::CONTROL_SESSIONS_TOTAL).increment(1);
        gauge!(names::CONTROL_SESSIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for SessionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::CONTROL_SESSIONS_ACTIVE).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_guard() {
        // No recorder installed; just check nothing panics.
        let _guard = SessionMetricsGuard::new();
        record_handshake("admitted", "owner");
        record_sweep(&SweepReport::default());
    }
}
