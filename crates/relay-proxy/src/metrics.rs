//! Prometheus metrics for the relay pipeline.
//!
//! All series live under the `cortex_tenant` prefix. The request duration
//! histogram carries an empty `tenant` label unless per-tenant durations are
//! explicitly enabled in the tenant config; with many tenants the code/tenant
//! cross product gets expensive in Prometheus.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec, Counter,
    CounterVec, Encoder, Histogram, HistogramVec, TextEncoder,
};

lazy_static! {
    /// Counter for inbound Remote Write batches.
    pub static ref TIMESERIES_BATCHES_RECEIVED_TOTAL: Counter = register_counter!(
        "cortex_tenant_timeseries_batches_received_total",
        "The total number of batches received."
    )
    .unwrap();

    /// Histogram for inbound batch sizes in bytes.
    pub static ref TIMESERIES_BATCHES_RECEIVED_BYTES: Histogram = register_histogram!(
        "cortex_tenant_timeseries_batches_received_bytes",
        "Size in bytes of timeseries batches received.",
        vec![
            0.5, 1.0, 10.0, 25.0, 100.0, 250.0, 500.0, 1000.0, 5000.0, 10000.0, 30000.0,
            300000.0, 600000.0, 1800000.0, 3600000.0
        ]
    )
    .unwrap();

    /// Counter for classified series per tenant; also incremented with an
    /// empty tenant label as a global total.
    pub static ref TIMESERIES_RECEIVED_TOTAL: CounterVec = register_counter_vec!(
        "cortex_tenant_timeseries_received_total",
        "The total number of timeseries received.",
        &["tenant"]
    )
    .unwrap();

    /// Counter for upstream writes per tenant.
    pub static ref TIMESERIES_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "cortex_tenant_timeseries_requests_total",
        "The total number of tenant-specific timeseries writes.",
        &["tenant"]
    )
    .unwrap();

    /// Counter for upstream writes that failed at the transport level.
    pub static ref TIMESERIES_REQUEST_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "cortex_tenant_timeseries_request_errors_total",
        "The total number of tenant-specific timeseries writes that yielded errors.",
        &["tenant"]
    )
    .unwrap();

    /// Histogram for upstream write durations, labelled by response code.
    pub static ref TIMESERIES_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "cortex_tenant_timeseries_request_duration_seconds",
        "HTTP write request duration for tenant-specific timeseries in seconds, filtered by response code.",
        &["code", "tenant"],
        vec![
            0.5, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
            10000.0, 30000.0, 60000.0, 1800000.0, 3600000.0
        ]
    )
    .unwrap();
}

/// Handler for the `/metrics` endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", encoder.format_type())],
            buffer,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

/// Router for the dedicated metrics listener.
pub fn router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_carry_the_namespace() {
        TIMESERIES_BATCHES_RECEIVED_TOTAL.inc();
        TIMESERIES_RECEIVED_TOTAL.with_label_values(&["solar"]).inc();

        let mut buffer = vec![];
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .unwrap();
        let exposition = String::from_utf8(buffer).unwrap();

        assert!(exposition.contains("cortex_tenant_timeseries_batches_received_total"));
        assert!(exposition.contains("cortex_tenant_timeseries_received_total{tenant=\"solar\"}"));
    }
}
