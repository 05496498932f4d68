//! # Per-topic Circuit Breaker
//!
//! Stops dispatch to a topic whose handlers fail systemically, so producers
//! get an immediate rejection instead of paying for fan-outs that will fail.
//!
//! State machine (one instance per topic):
//! ```text
//! [CLOSED] ──failures reach threshold──→ [OPEN]
//!     ↑  └─ clean publish resets tally      │
//!     │                                     ├── reset()/reset_all() ──→ [CLOSED]
//!     │                                     │
//!     │                         cooldown elapsed (only if configured)
//!     │                                     ↓
//!     └──────── probe succeeded ─────── [HALF_OPEN] ── probe failed ──→ [OPEN]
//! ```
//!
//! Without a cooldown the OPEN state is terminal until an explicit reset.
//! Only the probe currently in flight can move a topic out of HALF_OPEN;
//! publishes admitted earlier only add their failures to the tally when
//! they settle.
//! Every read-modify-write of a topic's tally happens under one mutex, so
//! concurrent failing publishes never lose increments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bus_telemetry::metrics;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::errors::PublishError;
use crate::DEFAULT_FAILURE_THRESHOLD;

/// Circuit state of one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CircuitState {
    /// Dispatch proceeds normally.
    #[default]
    Closed,
    /// Publishes are rejected without invoking handlers.
    Open,
    /// One probe publish is in flight after the cooldown.
    HalfOpen,
}

impl CircuitState {
    /// Prometheus gauge value (0=Closed, 1=Open, 2=HalfOpen)
    pub fn as_metric_value(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::Open => 1.0,
            Self::HalfOpen => 2.0,
        }
    }
}

/// Breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Cumulative handler failures that open the circuit.
    pub failure_threshold: u32,
    /// Wait before a probe is admitted. `None` disables automatic recovery.
    pub cooldown: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: None,
        }
    }
}

/// How a publish was let through. Hand it back to [`CircuitBreaker::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed.
    Normal,
    /// Cooldown elapsed; this publish decides whether the circuit closes.
    Probe {
        /// Breaker-wide unique id of this probe.
        attempt: u64,
    },
}

impl Admission {
    #[must_use]
    pub fn is_probe(self) -> bool {
        matches!(self, Self::Probe { .. })
    }
}

#[derive(Debug, Default)]
struct TopicCircuit {
    state: CircuitState,
    failures: u32,
    /// Set on entering OPEN, and on admitting a probe.
    since: Option<Instant>,
    /// Attempt id of the probe allowed to settle HALF_OPEN.
    probe: Option<u64>,
}

/// Per-topic failure tracker.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: Mutex<HashMap<String, TopicCircuit>>,
    opened: AtomicU64,
    rejected: AtomicU64,
    probes: AtomicU64,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: Mutex::new(HashMap::new()),
            opened: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            probes: AtomicU64::new(0),
        }
    }

    /// Decide whether a publish to `topic` may dispatch.
    ///
    /// # Errors
    ///
    /// `PublishError::CircuitOpen` while the circuit is open (or a probe is
    /// already in flight).
    pub fn check(&self, topic: &str) -> Result<Admission, PublishError> {
        let mut circuits = self.circuits.lock();
        let Some(circuit) = circuits.get_mut(topic) else {
            return Ok(Admission::Normal);
        };

        match circuit.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open | CircuitState::HalfOpen => {
                if self.cooldown_elapsed(circuit) {
                    let attempt = self.probes.fetch_add(1, Ordering::Relaxed) + 1;
                    if circuit.state == CircuitState::Open {
                        metrics::set_circuit_state(topic, CircuitState::HalfOpen.as_metric_value());
                    }
                    circuit.state = CircuitState::HalfOpen;
                    circuit.since = Some(Instant::now());
                    circuit.probe = Some(attempt);
                    info!(topic, attempt, "Circuit half-open, admitting probe publish");
                    return Ok(Admission::Probe { attempt });
                }
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Err(PublishError::CircuitOpen {
                    topic: topic.to_string(),
                })
            }
        }
    }

    /// Fold the outcome of one dispatched publish into the topic's circuit.
    ///
    /// `failures` is the number of handler invocations that failed and
    /// `admission` is what [`check`](Self::check) returned for that publish.
    /// Returns the state after the update.
    pub fn record(&self, topic: &str, failures: u32, admission: Admission) -> CircuitState {
        let mut circuits = self.circuits.lock();

        if failures == 0 && !circuits.contains_key(topic) {
            return CircuitState::Closed;
        }

        let circuit = circuits.entry(topic.to_string()).or_default();
        let before = circuit.state;
        let after = self.next_state(circuit, failures, admission);

        match (before, after) {
            (CircuitState::Closed, CircuitState::Closed) => {
                circuit.failures = if failures == 0 {
                    0
                } else {
                    circuit.failures.saturating_add(failures)
                };
            }
            (_, CircuitState::Closed) => {
                circuit.failures = 0;
                circuit.since = None;
                circuit.probe = None;
            }
            (CircuitState::Open, CircuitState::Open)
            | (CircuitState::HalfOpen, CircuitState::HalfOpen) => {
                // Settled outside the probe; only the tally moves.
                circuit.failures = circuit.failures.saturating_add(failures);
            }
            (_, CircuitState::Open) => {
                circuit.failures = circuit.failures.saturating_add(failures);
                circuit.since = Some(Instant::now());
                circuit.probe = None;
                self.opened.fetch_add(1, Ordering::Relaxed);
            }
            (_, CircuitState::HalfOpen) => {}
        }
        circuit.state = after;

        if before != after {
            metrics::set_circuit_state(topic, after.as_metric_value());
            match after {
                CircuitState::Open if before == CircuitState::HalfOpen => {
                    warn!(topic, failures, "Circuit re-opened, probe publish failed");
                }
                CircuitState::Open => {
                    error!(
                        topic,
                        failures = circuit.failures,
                        threshold = self.config.failure_threshold,
                        "Circuit opened, rejecting further publishes"
                    );
                }
                CircuitState::Closed => info!(topic, "Circuit closed, probe publish succeeded"),
                CircuitState::HalfOpen => {}
            }
        }

        if circuit.state == CircuitState::Closed && circuit.failures == 0 {
            circuits.remove(topic);
        }
        after
    }

    /// Deterministic transition for one publish outcome.
    fn next_state(&self, circuit: &TopicCircuit, failures: u32, admission: Admission) -> CircuitState {
        match (circuit.state, admission) {
            (CircuitState::Closed, _) => {
                let tally = circuit.failures.saturating_add(failures);
                if failures > 0 && tally >= self.config.failure_threshold {
                    CircuitState::Open
                } else {
                    CircuitState::Closed
                }
            }
            (CircuitState::HalfOpen, Admission::Probe { attempt })
                if circuit.probe == Some(attempt) =>
            {
                if failures == 0 {
                    CircuitState::Closed
                } else {
                    CircuitState::Open
                }
            }
            // Publishes admitted before the circuit opened, and superseded
            // probes, settle here.
            (state, _) => state,
        }
    }

    fn cooldown_elapsed(&self, circuit: &TopicCircuit) -> bool {
        match (self.config.cooldown, circuit.since) {
            (Some(cooldown), Some(since)) => since.elapsed() >= cooldown,
            _ => false,
        }
    }

    /// Current state of `topic`'s circuit.
    #[must_use]
    pub fn state(&self, topic: &str) -> CircuitState {
        self.circuits
            .lock()
            .get(topic)
            .map_or(CircuitState::Closed, |c| c.state)
    }

    /// Failures tallied for `topic` since its circuit last closed.
    #[must_use]
    pub fn failure_count(&self, topic: &str) -> u32 {
        self.circuits.lock().get(topic).map_or(0, |c| c.failures)
    }

    /// Topics whose circuit is currently open or half-open.
    #[must_use]
    pub fn open_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .circuits
            .lock()
            .iter()
            .filter(|(_, c)| c.state != CircuitState::Closed)
            .map(|(t, _)| t.clone())
            .collect();
        topics.sort();
        topics
    }

    /// Close `topic`'s circuit and forget its tally. Returns the prior state.
    pub fn reset(&self, topic: &str) -> CircuitState {
        let prior = self
            .circuits
            .lock()
            .remove(topic)
            .map_or(CircuitState::Closed, |c| c.state);
        if prior != CircuitState::Closed {
            metrics::set_circuit_state(topic, CircuitState::Closed.as_metric_value());
            info!(topic, ?prior, "Circuit reset by operator");
        }
        prior
    }

    /// Close every circuit.
    pub fn reset_all(&self) {
        let drained: Vec<(String, TopicCircuit)> = self.circuits.lock().drain().collect();
        for (topic, circuit) in drained {
            if circuit.state != CircuitState::Closed {
                metrics::set_circuit_state(&topic, CircuitState::Closed.as_metric_value());
            }
        }
    }

    /// Times any circuit transitioned into OPEN.
    #[must_use]
    pub fn opened_count(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    /// Publishes refused by an open circuit.
    #[must_use]
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
