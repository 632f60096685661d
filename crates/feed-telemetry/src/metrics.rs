//! Prometheus metrics for the broker feed.
//!
//! All metrics follow the naming convention: `feed_<area>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., deliveries received)
//! - **Gauge**: Value that can go up or down (e.g., active subscriptions)
//! - **Histogram**: Distribution of values (e.g., decode duration)

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // SUBSCRIPTION METRICS
    // =========================================================================

    /// Raw deliveries taken from the broker
    pub static ref DELIVERIES_RECEIVED: CounterVec = CounterVec::new(
        Opts::new("feed_subscription_deliveries_received_total", "Deliveries received from the broker"),
        &["consumer_tag"]
    ).expect("metric creation failed");

    /// Decoded events handed to the feed reader
    pub static ref EVENTS_FORWARDED: CounterVec = CounterVec::new(
        Opts::new("feed_subscription_events_forwarded_total", "Events forwarded to the feed reader"),
        &["consumer_tag"]
    ).expect("metric creation failed");

    /// Deliveries whose payload could not be decoded
    pub static ref DECODE_FAILURES: CounterVec = CounterVec::new(
        Opts::new("feed_subscription_decode_failures_total", "Deliveries that failed to decode"),
        &["consumer_tag"]
    ).expect("metric creation failed");

    /// Subscription bridges currently running
    pub static ref ACTIVE_SUBSCRIPTIONS: Gauge = Gauge::new(
        "feed_subscription_active",
        "Number of running subscription bridges"
    ).expect("metric creation failed");

    /// Time spent decoding a payload
    pub static ref DECODE_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "feed_subscription_decode_duration_seconds",
            "Time spent decoding delivery payloads"
        ).buckets(exponential_buckets(0.00001, 2.0, 14).expect("valid buckets"))
    ).expect("metric creation failed");

    // =========================================================================
    // PUBLISHER METRICS
    // =========================================================================

    /// Events published, by outcome (ack, nack, unconfirmed)
    pub static ref EVENTS_PUBLISHED: CounterVec = CounterVec::new(
        Opts::new("feed_publisher_events_published_total", "Events published to the broker"),
        &["exchange", "outcome"]
    ).expect("metric creation failed");
}

/// Handle returned once metrics are registered
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Subscription
        Box::new(DELIVERIES_RECEIVED.clone()),
        Box::new(EVENTS_FORWARDED.clone()),
        Box::new(DECODE_FAILURES.clone()),
        Box::new(ACTIVE_SUBSCRIPTIONS.clone()),
        Box::new(DECODE_DURATION.clone()),
        // Publisher
        Box::new(EVENTS_PUBLISHED.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}
