//! Bus configuration.

use std::env;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::{DEFAULT_FAILURE_THRESHOLD, DEFAULT_MAX_SUBSCRIBERS};

/// Limits and failure policy for one [`EventBus`](crate::EventBus) instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Maximum subscribers per topic.
    pub max_subscribers_per_topic: usize,

    /// Cumulative handler failures on a topic before its circuit opens.
    pub failure_threshold: u32,

    /// Time an open circuit waits before admitting one probe publish.
    /// `None` keeps the circuit open until it is reset explicitly.
    pub circuit_cooldown: Option<Duration>,

    /// Upper bound on a single handler invocation. `None` waits indefinitely.
    pub handler_timeout: Option<Duration>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_subscribers_per_topic: DEFAULT_MAX_SUBSCRIBERS,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            circuit_cooldown: None,
            handler_timeout: None,
        }
    }
}

impl BusConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `EVENT_BUS_MAX_SUBSCRIBERS`: subscribers per topic (default: 50)
    /// - `EVENT_BUS_FAILURE_THRESHOLD`: failures before a circuit opens (default: 10)
    /// - `EVENT_BUS_CIRCUIT_COOLDOWN_MS`: cooldown before a probe (default: unset, manual reset)
    /// - `EVENT_BUS_HANDLER_TIMEOUT_MS`: per-handler timeout (default: unset, no timeout)
    ///
    /// Unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_subscribers_per_topic: env::var("EVENT_BUS_MAX_SUBSCRIBERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_subscribers_per_topic),

            failure_threshold: env::var("EVENT_BUS_FAILURE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.failure_threshold),

            circuit_cooldown: env_millis("EVENT_BUS_CIRCUIT_COOLDOWN_MS"),

            handler_timeout: env_millis("EVENT_BUS_HANDLER_TIMEOUT_MS"),
        }
    }

    #[must_use]
    pub fn with_max_subscribers(mut self, max: usize) -> Self {
        self.max_subscribers_per_topic = max;
        self
    }

    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_circuit_cooldown(mut self, cooldown: Duration) -> Self {
        self.circuit_cooldown = Some(cooldown);
        self
    }

    #[must_use]
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    /// Reject limits that would make the bus unusable.
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` for a zero subscriber limit, zero failure
    /// threshold, or zero handler timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_subscribers_per_topic == 0 {
            return Err(ConfigError::Invalid {
                field: "max_subscribers_per_topic",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "failure_threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.handler_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid {
                field: "handler_timeout",
                reason: "must be non-zero when set".to_string(),
            });
        }
        Ok(())
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}
