// Gateway Prometheus metrics
//
// - Request counters by response status
// - Cache lookups by outcome (hit, miss, coalesced), evictions and residency
// - Transform counters by output format and outcome
// - Stage latency histograms (fetch, process)

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::sync::OnceLock;
use std::time::Duration;

pub struct GatewayMetrics {
    /// Responses by HTTP status code
    pub requests: IntCounterVec,

    /// Cache lookups by outcome
    pub cache_lookups: IntCounterVec,

    /// Entries evicted to stay under the byte ceiling
    pub cache_evictions: IntCounter,

    /// Results too large to ever fit in a shard
    pub cache_rejected: IntCounter,

    pub cache_resident_bytes: IntGauge,

    pub cache_entries: IntGauge,

    /// Transforms by output format and outcome
    pub transforms: IntCounterVec,

    /// Stage durations in seconds
    pub stage_duration: HistogramVec,

    /// Source bytes downloaded
    pub source_bytes: IntCounter,
}

static METRICS: OnceLock<GatewayMetrics> = OnceLock::new();

impl GatewayMetrics {
    /// Initialize and return the global metrics instance
    pub fn global() -> &'static Self {
        METRICS.get_or_init(|| {
            let requests = register_int_counter_vec!(
                "imgate_requests_total",
                "Total number of image requests by response status",
                &["status"]
            )
            .expect("Failed to register requests_total metric");

            let cache_lookups = register_int_counter_vec!(
                "imgate_cache_lookups_total",
                "Result cache lookups by outcome",
                &["outcome"] // hit, miss, coalesced
            )
            .expect("Failed to register cache_lookups_total metric");

            let cache_evictions = register_int_counter!(
                "imgate_cache_evictions_total",
                "Entries evicted from the result cache"
            )
            .expect("Failed to register cache_evictions_total metric");

            let cache_rejected = register_int_counter!(
                "imgate_cache_rejected_total",
                "Results not cached because they exceed the shard budget"
            )
            .expect("Failed to register cache_rejected_total metric");

            let cache_resident_bytes = register_int_gauge!(
                "imgate_cache_resident_bytes",
                "Bytes currently held by the result cache"
            )
            .expect("Failed to register cache_resident_bytes metric");

            let cache_entries = register_int_gauge!(
                "imgate_cache_entries",
                "Entries currently held by the result cache"
            )
            .expect("Failed to register cache_entries metric");

            let transforms = register_int_counter_vec!(
                "imgate_transforms_total",
                "Transforms by output format and outcome",
                &["format", "outcome"]
            )
            .expect("Failed to register transforms_total metric");

            let stage_duration = register_histogram_vec!(
                "imgate_stage_duration_seconds",
                "Duration of pipeline stages in seconds",
                &["stage"], // fetch, queue, process
                vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
            )
            .expect("Failed to register stage_duration_seconds metric");

            let source_bytes = register_int_counter!(
                "imgate_source_bytes_total",
                "Bytes downloaded from image sources"
            )
            .expect("Failed to register source_bytes_total metric");

            GatewayMetrics {
                requests,
                cache_lookups,
                cache_evictions,
                cache_rejected,
                cache_resident_bytes,
                cache_entries,
                transforms,
                stage_duration,
                source_bytes,
            }
        })
    }

    pub fn record_request(&self, status: u16) {
        self.requests.with_label_values(&[&status.to_string()]).inc();
    }

    pub fn record_lookup(&self, outcome: &str) {
        self.cache_lookups.with_label_values(&[outcome]).inc();
    }

    pub fn record_transform(&self, format: &str, outcome: &str) {
        self.transforms.with_label_values(&[format, outcome]).inc();
    }

    pub fn observe_stage(&self, stage: &str, duration: Duration) {
        self.stage_duration
            .with_label_values(&[stage])
            .observe(duration.as_secs_f64());
    }
}

/// Render every registered metric in the Prometheus text format
pub fn render() -> String {
    // Registers the gateway metrics even before the first request
    let _ = GatewayMetrics::global();

    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
