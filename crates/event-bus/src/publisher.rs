//! # Dispatcher
//!
//! [`EventBus`] fans every published envelope out to all subscribers of its
//! topic and folds the outcomes into the topic's circuit.
//!
//! ## Publish flow
//!
//! ```text
//! publish(envelope)
//!     │
//!     ├── no subscribers ──────────────→ Ok (nothing invoked, breaker untouched)
//!     ├── circuit open ────────────────→ Err(CircuitOpen) (nothing invoked)
//!     │
//!     ├──► handler 1 ─┐
//!     ├──► handler 2 ─┤  concurrent, each behind catch_unwind (+ optional timeout)
//!     └──► handler N ─┘
//!                     │
//!              all settled
//!                     │
//!     breaker.record(topic, failures, admission)
//!                     │
//!     failures == 0 ? Ok(report) : Err(HandlersFailed(aggregate))
//! ```
//!
//! ## Rules
//! - A failing, panicking or slow handler never stops its siblings from
//!   starting or completing
//! - Failures are reported once, after every handler settled, in
//!   registration order
//! - Succeeded handlers are not rolled back when siblings fail
//! - Publishes to the same topic are not serialized

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bus_telemetry::{metrics, resolve_correlation_id};
use futures::future::join_all;
use futures::FutureExt;
use tracing::{debug, field, info, info_span, warn, Instrument};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::config::BusConfig;
use crate::envelope::EventEnvelope;
use crate::errors::{
    AggregatePublishFailure, ConfigError, HandlerFailure, HandlerFault, PublishError,
    PublishResult, SubscribeResult,
};
use crate::registry::{HandlerRegistry, Registration};
use crate::subscriber::{EventHandler, Subscriber};

/// Publishing side of the bus.
///
/// Producers depend on this trait rather than on [`EventBus`] directly.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an envelope to every subscriber of its topic.
    ///
    /// # Errors
    ///
    /// - `PublishError::CircuitOpen` if the topic's circuit is open
    /// - `PublishError::HandlersFailed` if one or more handlers failed
    async fn publish(&self, envelope: EventEnvelope) -> PublishResult<PublishReport>;
}

/// Outcome of a publish in which every handler succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishReport {
    /// Handlers invoked.
    pub invoked: usize,
    /// Whether this publish was the half-open probe that closed the circuit.
    pub probe: bool,
}

/// Counters since the bus was created. `clear` does not reset them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusStats {
    /// Publishes that reached dispatch.
    pub published: u64,
    /// Publishes refused by an open circuit.
    pub rejected: u64,
    /// Failed handler invocations.
    pub handler_failures: u64,
    /// Times a circuit opened.
    pub circuits_opened: u64,
}

/// In-process publish/subscribe bus.
///
/// Each instance owns its own registry and circuits; create one per
/// process (or per test).
pub struct EventBus {
    registry: HandlerRegistry,
    breaker: CircuitBreaker,
    handler_timeout: Option<Duration>,
    published: AtomicU64,
    handler_failures: AtomicU64,
}

impl EventBus {
    /// Create a bus with default limits (50 subscribers per topic,
    /// circuit opens after 10 failures, no cooldown, no handler timeout).
    #[must_use]
    pub fn new() -> Self {
        Self::build(&BusConfig::default())
    }

    /// Create a bus with explicit limits.
    ///
    /// # Errors
    ///
    /// `ConfigError` if `config` fails [`BusConfig::validate`].
    pub fn with_config(config: BusConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(&config))
    }

    fn build(config: &BusConfig) -> Self {
        Self {
            registry: HandlerRegistry::new(config.max_subscribers_per_topic),
            breaker: CircuitBreaker::new(CircuitBreakerConfig {
                failure_threshold: config.failure_threshold,
                cooldown: config.circuit_cooldown,
            }),
            handler_timeout: config.handler_timeout,
            published: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
        }
    }

    /// Register `handler` for `topic` under `plugin_id`.
    ///
    /// Registering the same `(topic, plugin_id)` twice keeps the first
    /// handler and returns `Registration::AlreadyRegistered`.
    ///
    /// # Errors
    ///
    /// `SubscribeError::CapacityExceeded` when the topic is full, or an
    /// empty-key error.
    pub fn subscribe(
        &self,
        topic: &str,
        plugin_id: &str,
        handler: Arc<dyn EventHandler>,
    ) -> SubscribeResult<Registration> {
        self.registry
            .subscribe(topic, plugin_id, handler)
            .inspect_err(|e| {
                warn!(topic, plugin_id, error = %e, reason = e.as_label(), "Subscription rejected");
            })
    }

    /// Remove `plugin_id` from `topic`. No-op if absent.
    pub fn unsubscribe(&self, topic: &str, plugin_id: &str) {
        self.registry.unsubscribe(topic, plugin_id);
    }

    /// Snapshot of every topic's subscribers, for introspection.
    #[must_use]
    pub fn get_handlers(&self) -> HashMap<String, Vec<Subscriber>> {
        self.registry.snapshot()
    }

    /// Subscribers currently registered for `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.registry.subscriber_count(topic)
    }

    /// Drop every subscription and close every circuit.
    ///
    /// Meant for test isolation, not for production traffic.
    pub fn clear(&self) {
        self.registry.clear();
        self.breaker.reset_all();
        info!("Event bus cleared");
    }

    /// Circuit state of `topic`.
    #[must_use]
    pub fn circuit_state(&self, topic: &str) -> CircuitState {
        self.breaker.state(topic)
    }

    /// Close one topic's circuit without touching its subscriptions.
    pub fn reset_circuit(&self, topic: &str) -> CircuitState {
        self.breaker.reset(topic)
    }

    /// Topics whose circuit is open or probing.
    #[must_use]
    pub fn open_circuits(&self) -> Vec<String> {
        self.breaker.open_topics()
    }

    /// Lifetime publish, rejection and failure counters.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            rejected: self.breaker.rejected_count(),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            circuits_opened: self.breaker.opened_count(),
        }
    }

    /// Publish `envelope` to every subscriber of `envelope.name`.
    ///
    /// # Errors
    ///
    /// - `PublishError::CircuitOpen`: the topic's circuit is open; no handler ran
    /// - `PublishError::HandlersFailed`: at least one handler failed; every
    ///   other handler still ran to completion
    pub async fn publish(&self, envelope: EventEnvelope) -> PublishResult<PublishReport> {
        let subscribers = self.registry.handlers_for(&envelope.name);
        if subscribers.is_empty() {
            debug!(topic = %envelope.name, "No subscribers, nothing dispatched");
            return Ok(PublishReport::default());
        }

        let correlation_id = resolve_correlation_id(envelope.correlation_id());

        let admission = match self.breaker.check(&envelope.name) {
            Ok(admission) => admission,
            Err(e) => {
                metrics::record_rejected(&envelope.name);
                debug!(
                    topic = %envelope.name,
                    event_id = %envelope.id,
                    correlation_id = correlation_id.as_deref().unwrap_or_default(),
                    "Publish rejected, circuit open"
                );
                return Err(e);
            }
        };

        self.published.fetch_add(1, Ordering::Relaxed);
        metrics::record_published(&envelope.name);
        let probe = admission.is_probe();

        let span = info_span!(
            "event_bus.publish",
            topic = %envelope.name,
            event_id = %envelope.id,
            correlation_id = correlation_id.as_deref().unwrap_or_default(),
            handlers = subscribers.len(),
            probe,
            otel.status_code = field::Empty,
        );

        let started = std::time::Instant::now();
        let envelope = Arc::new(envelope);
        let outcomes = join_all(
            subscribers
                .iter()
                .map(|subscriber| self.invoke(subscriber, Arc::clone(&envelope))),
        )
        .instrument(span.clone())
        .await;
        metrics::observe_publish_duration(started.elapsed().as_secs_f64());

        let invoked = outcomes.len();
        let failures: Vec<HandlerFailure> = outcomes.into_iter().filter_map(Result::err).collect();
        let failed = u32::try_from(failures.len()).unwrap_or(u32::MAX);
        self.breaker.record(&envelope.name, failed, admission);

        if failures.is_empty() {
            return Ok(PublishReport { invoked, probe });
        }

        self.handler_failures
            .fetch_add(failures.len() as u64, Ordering::Relaxed);
        span.record("otel.status_code", "ERROR");
        span.in_scope(|| {
            warn!(
                failed = failures.len(),
                invoked,
                plugins = ?failures.iter().map(|f| f.plugin_id.as_str()).collect::<Vec<_>>(),
                "Publish completed with handler failures"
            );
        });

        Err(PublishError::HandlersFailed(AggregatePublishFailure {
            topic: envelope.name.clone(),
            succeeded: invoked - failures.len(),
            failures,
        }))
    }

    /// Run one handler behind the isolation wrapper.
    async fn invoke(
        &self,
        subscriber: &Subscriber,
        envelope: Arc<EventEnvelope>,
    ) -> Result<(), HandlerFailure> {
        let topic = envelope.name.clone();
        let plugin_id = subscriber.plugin_id();
        let span = info_span!(
            "event_bus.handler",
            topic = %topic,
            plugin_id,
            otel.status_code = field::Empty,
        );

        let call = AssertUnwindSafe(subscriber.handler().handle(envelope)).catch_unwind();
        let settled = match self.handler_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .instrument(span.clone())
                .await
                .map_err(|_| HandlerFault::TimedOut(limit)),
            None => Ok(call.instrument(span.clone()).await),
        };

        let outcome = match settled {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(HandlerFault::Failed(e)),
            Ok(Err(panic)) => Err(HandlerFault::Panicked(panic_message(panic.as_ref()))),
            Err(fault) => Err(fault),
        };

        match outcome {
            Ok(()) => {
                metrics::record_handler_outcome(&topic, "success");
                Ok(())
            }
            Err(fault) => {
                metrics::record_handler_outcome(&topic, fault.as_label());
                span.record("otel.status_code", "ERROR");
                span.in_scope(|| {
                    warn!(error = %fault, kind = fault.as_label(), "Handler failed");
                });
                Err(HandlerFailure {
                    topic,
                    plugin_id: plugin_id.to_string(),
                    fault,
                })
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, envelope: EventEnvelope) -> PublishResult<PublishReport> {
        EventBus::publish(self, envelope).await
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
