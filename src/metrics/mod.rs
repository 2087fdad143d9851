//! Metrics module for Prometheus monitoring

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

static REGISTRY: OnceLock<Metrics> = OnceLock::new();

/// Application metrics
pub struct Metrics {
    pub registry: Registry,

    // Request metrics
    pub requests_total: IntCounter,
    pub requests_by_method: IntCounterVec,
    pub requests_by_status: IntCounterVec,
    pub request_duration_seconds: Histogram,

    // Cache metrics
    pub cache_hits_total: IntCounter,
    pub cache_misses_total: IntCounter,
    pub cache_coalesced_total: IntCounter,
    pub unsupported_media_total: IntCounter,

    // Upstream metrics
    pub upstream_requests_total: IntCounter,
    pub upstream_errors_total: IntCounter,
    pub upstream_request_duration_seconds: Histogram,
}

fn register<C>(registry: &Registry, collector: C) -> C
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .expect("metric names are unique");
    collector
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        // Request metrics
        let requests_total = register(
            &registry,
            IntCounter::new("requests_total", "Total number of requests")
                .expect("metric can be created"),
        );

        let requests_by_method = register(
            &registry,
            IntCounterVec::new(
                Opts::new("requests_by_method_total", "Requests by HTTP method"),
                &["method"],
            )
            .expect("metric can be created"),
        );

        let requests_by_status = register(
            &registry,
            IntCounterVec::new(
                Opts::new("requests_by_status_total", "Requests by HTTP status code"),
                &["status"],
            )
            .expect("metric can be created"),
        );

        let request_duration_seconds = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new("request_duration_seconds", "Request duration in seconds")
                    .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            )
            .expect("metric can be created"),
        );

        // Cache metrics
        let cache_hits_total = register(
            &registry,
            IntCounter::new("cache_hits_total", "Acquisitions answered from a meta record")
                .expect("metric can be created"),
        );

        let cache_misses_total = register(
            &registry,
            IntCounter::new("cache_misses_total", "Acquisitions without a meta record")
                .expect("metric can be created"),
        );

        let cache_coalesced_total = register(
            &registry,
            IntCounter::new(
                "cache_coalesced_total",
                "Misses that joined an acquisition already in flight",
            )
            .expect("metric can be created"),
        );

        let unsupported_media_total = register(
            &registry,
            IntCounter::new(
                "unsupported_media_total",
                "Downloads rejected by the media-type whitelist",
            )
            .expect("metric can be created"),
        );

        // Upstream metrics
        let upstream_requests_total = register(
            &registry,
            IntCounter::new("upstream_requests_total", "Total upstream requests")
                .expect("metric can be created"),
        );

        let upstream_errors_total = register(
            &registry,
            IntCounter::new("upstream_errors_total", "Upstream requests failing in transport")
                .expect("metric can be created"),
        );

        let upstream_request_duration_seconds = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new(
                    "upstream_request_duration_seconds",
                    "Time to upstream response headers in seconds",
                )
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            )
            .expect("metric can be created"),
        );

        Self {
            registry,
            requests_total,
            requests_by_method,
            requests_by_status,
            request_duration_seconds,
            cache_hits_total,
            cache_misses_total,
            cache_coalesced_total,
            unsupported_media_total,
            upstream_requests_total,
            upstream_errors_total,
            upstream_request_duration_seconds,
        }
    }
}

/// Initialize metrics (call once at startup)
pub fn init() {
    REGISTRY.get_or_init(Metrics::new);
}

/// Get the global metrics instance
pub fn get() -> &'static Metrics {
    REGISTRY.get_or_init(Metrics::new)
}

/// Encode metrics in Prometheus text format
pub fn encode() -> Result<String, prometheus::Error> {
    let metrics = get();
    let encoder = TextEncoder::new();
    let metric_families = metrics.registry.gather();

    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Record a cache hit
pub fn record_cache_hit() {
    get().cache_hits_total.inc();
}

/// Record a cache miss
pub fn record_cache_miss() {
    get().cache_misses_total.inc();
}

/// Record a miss served by another request's acquisition
pub fn record_coalesced() {
    get().cache_coalesced_total.inc();
}

/// Record a download rejected by content validation
pub fn record_unsupported_media() {
    get().unsupported_media_total.inc();
}

/// Record a request
pub fn record_request(method: &str, status: u16, duration_seconds: f64) {
    let m = get();
    m.requests_total.inc();
    m.requests_by_method.with_label_values(&[method]).inc();
    m.requests_by_status
        .with_label_values(&[&status.to_string()])
        .inc();
    m.request_duration_seconds.observe(duration_seconds);
}

/// Record an upstream request
pub fn record_upstream_request(duration_seconds: f64, is_error: bool) {
    let m = get();
    m.upstream_requests_total.inc();
    m.upstream_request_duration_seconds.observe(duration_seconds);
    if is_error {
        m.upstream_errors_total.inc();
    }
}
