//! Structured log output.
//!
//! Two output shapes are supported:
//! - JSON lines (containers, log shippers) with target, thread ids, file and line
//! - Human readable ANSI output for local development
//!
//! At most one console layer is active.

use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::TelemetryConfig;

/// Boxed layer over the subscriber stack `S`.
pub(crate) type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Build the console layer selected by `config`, if any.
pub(crate) fn console_layer<S>(config: &TelemetryConfig) -> Option<BoxedLayer<S>>
where
    S: Subscriber + for<'span> LookupSpan<'span> + 'static,
{
    if !config.console_output {
        return None;
    }

    if config.json_logs {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_current_span(true);
        Some(json_layer.boxed())
    } else {
        let pretty_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_ansi(true);
        Some(pretty_layer.boxed())
    }
}
