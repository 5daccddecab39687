//! Prometheus metrics handler

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder. Fails if one is already set.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("calling_negotiation_seconds".to_string()),
            &[0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
        )?
        .install_recorder()?;

    describe_counter!("calling_calls_total", "Calls started, by direction");
    describe_counter!("calling_calls_failed_total", "Calls that ended in failure");
    describe_gauge!("calling_active_sessions", "Live call sessions");
    describe_counter!("calling_transfers_requested_total", "Callers placed in the agent queue");
    describe_counter!("calling_transfers_picked_total", "Queue entries taken by agents");
    describe_counter!(
        "calling_dtmf_dropped_total",
        "DTMF digits dropped because the buffer was full"
    );
    describe_histogram!(
        "calling_negotiation_seconds",
        "Time from offer to local answer"
    );

    Ok(handle)
}

pub async fn metrics_handler(State(prometheus_handle): State<PrometheusHandle>) -> Response {
    (StatusCode::OK, prometheus_handle.render()).into_response()
}

