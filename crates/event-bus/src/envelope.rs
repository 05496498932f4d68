//! # Event Envelope
//!
//! The immutable record handed to `publish`. The bus routes on `name` and
//! never looks inside `payload`; payload shape per `(name, version)` is the
//! handler's concern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Schema version assigned by [`EventEnvelope::new`].
pub const DEFAULT_EVENT_VERSION: u32 = 1;

/// Tracing metadata attached to an envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    /// Ties together every publish in one causal chain.
    pub correlation_id: Option<String>,
    /// Originating bounded context (e.g. `"content"`, `"billing"`).
    pub domain_id: Option<String>,
    /// Free-form source tag (service or plugin that produced the event).
    pub source: Option<String>,
}

/// One occurrence of a domain event.
///
/// Built with [`EventEnvelope::new`] and the `with_*` builders, then handed to
/// the bus by value. The bus shares it with handlers as `Arc<EventEnvelope>`,
/// so it cannot change once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Unique event identifier.
    pub id: Uuid,
    /// Topic name, the routing key (e.g. `"content.published"`).
    pub name: String,
    /// Payload schema version.
    pub version: u32,
    /// When the event occurred (ISO-8601 on the wire).
    pub occurred_at: DateTime<Utc>,
    /// Opaque payload.
    pub payload: serde_json::Value,
    /// Correlation, domain and source tags.
    #[serde(default)]
    pub meta: EventMeta,
}

impl EventEnvelope {
    /// Create an envelope for `name` with a fresh id, version 1 and the current time.
    #[must_use]
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            version: DEFAULT_EVENT_VERSION,
            occurred_at: Utc::now(),
            payload,
            meta: EventMeta::default(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn with_occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.meta.correlation_id = Some(correlation_id.into());
        self
    }

    #[must_use]
    pub fn with_domain_id(mut self, domain_id: impl Into<String>) -> Self {
        self.meta.domain_id = Some(domain_id.into());
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.meta.source = Some(source.into());
        self
    }

    /// Topic this envelope is routed to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.name
    }

    /// Correlation id carried by the envelope itself.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.meta.correlation_id.as_deref()
    }
}
