//! Error types for the event bus.
//!
//! - [`SubscribeError`]: registration rejected
//! - [`HandlerFault`] / [`HandlerFailure`]: one handler invocation went wrong
//! - [`AggregatePublishFailure`]: every handler failure of one publish call
//! - [`PublishError`]: what `publish` returns to the producer
//! - [`ConfigError`]: invalid bus configuration

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Registration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscribeError {
    /// Topic name was empty.
    #[error("topic must not be empty")]
    EmptyTopic,

    /// Plugin id was empty.
    #[error("plugin id must not be empty")]
    EmptyPluginId,

    /// The topic already holds the maximum number of subscribers.
    #[error("topic {topic} already has the maximum of {limit} subscribers")]
    CapacityExceeded { topic: String, limit: usize },
}

impl SubscribeError {
    /// Stable snake_case label for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::EmptyTopic => "empty_topic",
            Self::EmptyPluginId => "empty_plugin_id",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
        }
    }
}

/// Why a single handler invocation failed.
#[derive(Debug, Error)]
pub enum HandlerFault {
    /// The handler returned an error.
    #[error("handler failed: {0:#}")]
    Failed(anyhow::Error),

    /// The handler panicked; the panic was caught.
    #[error("handler panicked: {0}")]
    Panicked(String),

    /// The handler did not settle within the configured timeout.
    #[error("handler timed out after {0:?}")]
    TimedOut(Duration),
}

impl HandlerFault {
    /// Stable snake_case label for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Failed(_) => "failed",
            Self::Panicked(_) => "panicked",
            Self::TimedOut(_) => "timed_out",
        }
    }
}

/// One failed handler invocation, attributed to its plugin.
#[derive(Debug, Error)]
#[error("plugin {plugin_id} failed on {topic}: {fault}")]
pub struct HandlerFailure {
    /// Topic that was being dispatched.
    pub topic: String,
    /// Plugin whose handler failed.
    pub plugin_id: String,
    /// What went wrong.
    #[source]
    pub fault: HandlerFault,
}

/// All handler failures from one publish call.
///
/// Handlers that succeeded are not rolled back.
#[derive(Debug)]
pub struct AggregatePublishFailure {
    /// Topic that was published.
    pub topic: String,
    /// Number of handlers that completed successfully.
    pub succeeded: usize,
    /// Failures in registration order.
    pub failures: Vec<HandlerFailure>,
}

impl AggregatePublishFailure {
    /// Plugin ids of the failed handlers, in registration order.
    pub fn failed_plugins(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.plugin_id.as_str()).collect()
    }

    /// Total handlers attempted in the publish call.
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failures.len()
    }
}

impl fmt::Display for AggregatePublishFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} handlers failed on {}",
            self.failures.len(),
            self.attempted(),
            self.topic
        )?;
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.plugin_id, failure.fault)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregatePublishFailure {}

/// Publish errors.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The topic's breaker is open; no handler was invoked.
    #[error("Circuit breaker open for topic {topic}")]
    CircuitOpen { topic: String },

    /// One or more handlers failed; the others ran to completion.
    #[error(transparent)]
    HandlersFailed(AggregatePublishFailure),
}

impl PublishError {
    /// Stable snake_case label for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "circuit_open",
            Self::HandlersFailed(_) => "handlers_failed",
        }
    }

    /// True when the publish was refused before dispatch.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Per-handler failures; empty for a circuit-open rejection.
    pub fn failures(&self) -> &[HandlerFailure] {
        match self {
            Self::CircuitOpen { .. } => &[],
            Self::HandlersFailed(aggregate) => &aggregate.failures,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Result type for registration.
pub type SubscribeResult<T> = Result<T, SubscribeError>;

/// Result type for publishing.
pub type PublishResult<T> = Result<T, PublishError>;
