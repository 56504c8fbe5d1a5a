//! Observability for the provider itself
//!
//! Provides:
//! - Prometheus metrics (request counts, errors, latency per operation)
//! - Structured logging of request outcomes with tracing

use crate::error::MetricsError;
use crate::models::ObjectReference;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Histogram buckets for request latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Operation labels
pub mod operations {
    pub const DISCOVERY: &str = "discovery";
    pub const RESOURCE_METRICS: &str = "resource_metrics";
    pub const EDGE_METRICS: &str = "edge_metrics";
}

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ProviderMetricsInner> = OnceLock::new();

struct ProviderMetricsInner {
    requests: IntCounterVec,
    request_errors: IntCounterVec,
    request_duration_seconds: HistogramVec,
}

impl ProviderMetricsInner {
    fn new() -> Self {
        Self {
            requests: register_int_counter_vec!(
                "istio_metrics_requests_total",
                "Metrics requests handled by the provider",
                &["operation", "kind"]
            )
            .expect("Failed to register requests_total"),

            request_errors: register_int_counter_vec!(
                "istio_metrics_request_errors_total",
                "Metrics requests that ended in an error",
                &["operation", "code"]
            )
            .expect("Failed to register request_errors_total"),

            request_duration_seconds: register_histogram_vec!(
                "istio_metrics_request_duration_seconds",
                "Time spent answering a metrics request, including the backend call",
                &["operation"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register request_duration_seconds"),
        }
    }
}

/// Handle to the provider's Prometheus metrics
///
/// Clones share the same process-wide collectors.
#[derive(Clone)]
pub struct ProviderMetrics {
    _private: (),
}

impl Default for ProviderMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ProviderMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ProviderMetricsInner {
        GLOBAL_METRICS.get_or_init(ProviderMetricsInner::new)
    }

    pub fn inc_requests(&self, operation: &str, kind: &str) {
        self.inner()
            .requests
            .with_label_values(&[operation, kind])
            .inc();
    }

    pub fn inc_errors(&self, operation: &str, error: &MetricsError) {
        self.inner()
            .request_errors
            .with_label_values(&[operation, error.code()])
            .inc();
    }

    pub fn observe_duration(&self, operation: &str, duration_secs: f64) {
        self.inner()
            .request_duration_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    pub fn requests(&self, operation: &str, kind: &str) -> u64 {
        self.inner()
            .requests
            .with_label_values(&[operation, kind])
            .get()
    }

    pub fn errors(&self, operation: &str, code: &str) -> u64 {
        self.inner()
            .request_errors
            .with_label_values(&[operation, code])
            .get()
    }
}

/// Structured logger for provider events
#[derive(Clone)]
pub struct StructuredLogger {
    provider: String,
}

impl StructuredLogger {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
        }
    }

    pub fn log_startup(&self, backend: &str, templates: usize) {
        info!(
            event = "provider_started",
            provider = %self.provider,
            backend = %backend,
            templates = templates,
            "Metrics provider ready"
        );
    }

    pub fn log_request(
        &self,
        operation: &str,
        obj: &ObjectReference,
        items: usize,
        duration_secs: f64,
    ) {
        debug!(
            event = "metrics_request",
            provider = %self.provider,
            operation = %operation,
            kind = %obj.kind,
            namespace = %obj.namespace,
            name = ?obj.name,
            items = items,
            duration_secs = duration_secs,
            "Metrics request served"
        );
    }

    pub fn log_request_failed(&self, operation: &str, obj: &ObjectReference, error: &MetricsError) {
        if error.is_aborted() || error.is_client_error() {
            info!(
                event = "metrics_request_failed",
                provider = %self.provider,
                operation = %operation,
                kind = %obj.kind,
                namespace = %obj.namespace,
                name = ?obj.name,
                code = error.code(),
                error = %error,
                "Metrics request did not complete"
            );
        } else {
            warn!(
                event = "metrics_request_failed",
                provider = %self.provider,
                operation = %operation,
                kind = %obj.kind,
                namespace = %obj.namespace,
                name = ?obj.name,
                code = error.code(),
                error = %error,
                "Metrics backend request failed"
            );
        }
    }

    pub fn log_missing_partner(&self, obj: &ObjectReference, index: usize) {
        warn!(
            event = "edge_without_partner",
            provider = %self.provider,
            kind = %obj.kind,
            namespace = %obj.namespace,
            name = ?obj.name,
            index = index,
            "Adapter returned an edge record without a partner resource"
        );
    }
}
