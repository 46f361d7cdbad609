use std::sync::OnceLock;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics_recorder() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("metrics recorder already installed")
        })
        .clone()
}

pub fn record_internal_error() {
    counter!("console_internal_errors_total").increment(1);
}

pub fn record_handshake_rejected(reason: &'static str) {
    counter!("console_handshake_rejections_total", "reason" => reason).increment(1);
}

pub fn record_agent_connected(connected_count: usize) {
    counter!("console_agent_connections_total").increment(1);
    gauge!("console_agents_connected").set(connected_count as f64);
}

pub fn record_agent_disconnected(connected_count: usize, reason: &'static str) {
    counter!("console_agent_disconnections_total", "reason" => reason).increment(1);
    gauge!("console_agents_connected").set(connected_count as f64);
}

pub fn record_heartbeat_timeout() {
    counter!("console_heartbeat_timeouts_total").increment(1);
}

pub fn record_push_submitted() {
    counter!("console_pushes_submitted_total").increment(1);
}

pub fn record_push_outcome(outcome: &'static str) {
    counter!("console_pushes_resolved_total", "outcome" => outcome).increment(1);
}
