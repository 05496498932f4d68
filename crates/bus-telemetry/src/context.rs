//! Correlation context for log lines and spans.
//!
//! A correlation id ties together every log line produced by one causal
//! chain of publishes. It is resolved in this order:
//!
//! 1. The id carried explicitly by the event envelope
//! 2. The task-local id installed with [`with_correlation_id`]
//! 3. The OpenTelemetry trace id of the current span, when span export is active
//!
//! ## Example
//!
//! ```rust,ignore
//! use bus_telemetry::context::{with_correlation_id, current_correlation_id};
//!
//! with_correlation_id("req-42", async {
//!     assert_eq!(current_correlation_id().as_deref(), Some("req-42"));
//!     bus.publish(envelope).await
//! })
//! .await;
//! ```

use std::future::Future;

use opentelemetry::trace::TraceContextExt;
use serde::{Deserialize, Serialize};
use tracing_opentelemetry::OpenTelemetrySpanExt;

tokio::task_local! {
    static CORRELATION_ID: String;
}

/// Run `fut` with `id` installed as the task-local correlation id.
pub async fn with_correlation_id<F>(id: impl Into<String>, fut: F) -> F::Output
where
    F: Future,
{
    CORRELATION_ID.scope(id.into(), fut).await
}

/// Correlation id installed for the current task, if any.
pub fn current_correlation_id() -> Option<String> {
    CORRELATION_ID.try_with(Clone::clone).ok()
}

/// Resolve the correlation id for a log line.
pub fn resolve_correlation_id(explicit: Option<&str>) -> Option<String> {
    explicit
        .map(str::to_string)
        .or_else(current_correlation_id)
        .or_else(|| {
            let propagated = PropagatedContext::from_current_span();
            propagated.is_valid().then_some(propagated.trace_id)
        })
}

/// Trace context that can be serialized into an envelope or log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagatedContext {
    /// Trace ID (32 hex characters)
    pub trace_id: String,
    /// Span ID (16 hex characters)
    pub span_id: String,
}

impl PropagatedContext {
    /// Create an empty context (no parent trace)
    pub fn empty() -> Self {
        Self {
            trace_id: "00000000000000000000000000000000".to_string(),
            span_id: "0000000000000000".to_string(),
        }
    }

    /// Extract the OpenTelemetry context of the current `tracing` span.
    ///
    /// Empty unless an OpenTelemetry layer is installed and the span is sampled.
    pub fn from_current_span() -> Self {
        let context = tracing::Span::current().context();
        let span = context.span();
        let span_context = span.span_context();

        if !span_context.is_valid() {
            return Self::empty();
        }

        Self {
            trace_id: span_context.trace_id().to_string(),
            span_id: span_context.span_id().to_string(),
        }
    }

    /// Check if this context is valid (has a real trace)
    pub fn is_valid(&self) -> bool {
        !self.trace_id.chars().all(|c| c == '0')
    }
}

impl Default for PropagatedContext {
    fn default() -> Self {
        Self::empty()
    }
}
