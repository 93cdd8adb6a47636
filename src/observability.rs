use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::BuildError;

use crate::engine::EngineError;
use crate::planner::Availability;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total computations. Labels: status.
pub const COMPUTATIONS_TOTAL: &str = "slotwise_computations_total";

/// Histogram: end-to-end computation latency in seconds.
pub const COMPUTE_DURATION_SECONDS: &str = "slotwise_compute_duration_seconds";

// ── Result shape ────────────────────────────────────────────────

/// Histogram: slots per successful computation.
pub const SLOTS_RETURNED: &str = "slotwise_slots_returned";

/// Counter: computations that found no free time. Labels: reason.
pub const EMPTY_RESULTS_TOTAL: &str = "slotwise_empty_results_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a computation outcome.
pub fn status_label(result: &Result<Availability, EngineError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.label(),
    }
}

pub fn record_computation(result: &Result<Availability, EngineError>, elapsed: Duration) {
    metrics::counter!(COMPUTATIONS_TOTAL, "status" => status_label(result)).increment(1);
    metrics::histogram!(COMPUTE_DURATION_SECONDS).record(elapsed.as_secs_f64());

    let Ok(availability) = result else { return };
    metrics::histogram!(SLOTS_RETURNED).record(availability.slots.len() as f64);
    if availability.slots.is_empty() {
        let reason = availability
            .explanations
            .first()
            .map_or("unexplained", |e| e.reason.label());
        metrics::counter!(EMPTY_RESULTS_TOTAL, "reason" => reason).increment(1);
    }
}
