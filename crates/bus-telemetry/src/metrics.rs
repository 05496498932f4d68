//! Prometheus metrics for the event bus.
//!
//! All metrics follow the naming convention: `bus_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., events_published_total)
//! - **Gauge**: Value that can go up or down (e.g., circuit_state)
//! - **Histogram**: Distribution of values (e.g., publish_duration_seconds)

use lazy_static::lazy_static;
use prometheus::{CounterVec, Encoder, GaugeVec, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Publish calls that reached dispatch
    pub static ref EVENTS_PUBLISHED: CounterVec = CounterVec::new(
        Opts::new("bus_events_published_total", "Publish calls dispatched to at least one handler"),
        &["topic"]
    ).expect("metric creation failed");

    /// Handler invocations by outcome
    pub static ref HANDLER_INVOCATIONS: CounterVec = CounterVec::new(
        Opts::new("bus_handler_invocations_total", "Handler invocations by outcome"),
        &["topic", "outcome"]  // outcome: success/failed/panicked/timed_out
    ).expect("metric creation failed");

    /// Publish calls rejected by an open circuit
    pub static ref PUBLISH_REJECTED: CounterVec = CounterVec::new(
        Opts::new("bus_publish_rejected_total", "Publish calls rejected by an open circuit"),
        &["topic"]
    ).expect("metric creation failed");

    /// Circuit state per topic (0=Closed, 1=Open, 2=HalfOpen)
    pub static ref CIRCUIT_STATE: GaugeVec = GaugeVec::new(
        Opts::new("bus_circuit_state", "Circuit breaker state per topic (0=closed, 1=open, 2=half-open)"),
        &["topic"]
    ).expect("metric creation failed");

    /// Wall time of a full fan-out
    pub static ref PUBLISH_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "bus_publish_duration_seconds",
            "Time from dispatch start until every handler settled"
        ).buckets(vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0])
    ).expect("metric creation failed");
}

/// Handle returned by [`register_metrics`].
pub struct MetricsHandle {
    registry: Registry,
}

impl MetricsHandle {
    /// Registry holding the bus metrics.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Register all metrics with the global registry.
///
/// Registering twice is not an error.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(EVENTS_PUBLISHED.clone()),
        Box::new(HANDLER_INVOCATIONS.clone()),
        Box::new(PUBLISH_REJECTED.clone()),
        Box::new(CIRCUIT_STATE.clone()),
        Box::new(PUBLISH_DURATION.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle {
        registry: REGISTRY.clone(),
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

/// Record one dispatched publish.
pub fn record_published(topic: &str) {
    EVENTS_PUBLISHED.with_label_values(&[topic]).inc();
}

/// Record one handler invocation outcome.
pub fn record_handler_outcome(topic: &str, outcome: &str) {
    HANDLER_INVOCATIONS.with_label_values(&[topic, outcome]).inc();
}

/// Record one publish rejected by an open circuit.
pub fn record_rejected(topic: &str) {
    PUBLISH_REJECTED.with_label_values(&[topic]).inc();
}

/// Export the circuit state of `topic`.
pub fn set_circuit_state(topic: &str, value: f64) {
    CIRCUIT_STATE.with_label_values(&[topic]).set(value);
}

/// Observe the duration of one fan-out.
pub fn observe_publish_duration(seconds: f64) {
    PUBLISH_DURATION.observe(seconds);
}
