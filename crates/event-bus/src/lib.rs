//! # Event Bus - In-process Publish/Subscribe with Failure Isolation
//!
//! Fans domain events out to plugin handlers, isolates every handler's
//! failure from its siblings, and trips a per-topic circuit breaker when a
//! topic's handlers fail systemically.
//!
//! ## Components
//!
//! ```text
//!                 subscribe()/unsubscribe()
//!   plugins ──────────────────────────────► ┌──────────────────┐
//!                                           │ HandlerRegistry  │
//!                                           └────────┬─────────┘
//!                 publish(envelope)                  │ handlers_for(topic)
//!   producer ──────────────► ┌──────────────┐ ◄──────┘
//!                            │   EventBus   │ ──── check()/record() ───► ┌────────────────┐
//!                            │ (dispatcher) │                            │ CircuitBreaker │
//!                            └──────┬───────┘                            └────────────────┘
//!                                   │ concurrent fan-out
//!                       ┌───────────┼───────────┐
//!                       ▼           ▼           ▼
//!                   handler 1   handler 2   handler N
//! ```
//!
//! ## Guarantees
//!
//! - **Isolation:** a handler error, panic or timeout never prevents sibling
//!   handlers from running to completion
//! - **Idempotent registration:** `(topic, plugin_id)` is registered at most once
//! - **Capacity:** at most `max_subscribers_per_topic` handlers per topic
//! - **Backpressure:** an open circuit rejects publishes before any handler runs
//!
//! ## Non-guarantees
//!
//! Events are not persisted, deduplicated or delivered across processes.
//! A rejected publish may still have had side effects in handlers that succeeded.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod circuit_breaker;
pub mod config;
pub mod envelope;
pub mod errors;
pub mod publisher;
pub mod registry;
pub mod subscriber;

// Re-export main types
pub use circuit_breaker::{Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::BusConfig;
pub use envelope::{EventEnvelope, EventMeta};
pub use errors::{
    AggregatePublishFailure, ConfigError, HandlerFailure, HandlerFault, PublishError,
    PublishResult, SubscribeError, SubscribeResult,
};
pub use publisher::{BusStats, EventBus, EventPublisher, PublishReport};
pub use registry::{HandlerRegistry, Registration};
pub use subscriber::{handler_fn, EventHandler, FnHandler, Subscriber};

/// Default maximum subscribers per topic.
pub const DEFAULT_MAX_SUBSCRIBERS: usize = 50;

/// Default cumulative handler failures before a topic's circuit opens.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 10;
