//! # Subscribers
//!
//! A subscriber is a plugin-named asynchronous handler bound to a topic.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::envelope::EventEnvelope;

/// Handler invoked for every envelope published on a subscribed topic.
///
/// Returning `Err` (or panicking) marks this invocation as failed; sibling
/// handlers for the same publish are unaffected.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: Arc<EventEnvelope>) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into an [`EventHandler`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Arc<EventEnvelope>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, envelope: Arc<EventEnvelope>) -> anyhow::Result<()> {
        (self.f)(envelope).await
    }
}

/// Wrap an async closure as a shareable handler.
///
/// ```rust,ignore
/// bus.subscribe("content.published", "seo", handler_fn(|env| async move {
///     reindex(&env.payload).await
/// }))?;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Arc<EventEnvelope>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// A `(plugin id, handler)` pair held by the registry.
#[derive(Clone)]
pub struct Subscriber {
    plugin_id: String,
    handler: Arc<dyn EventHandler>,
}

impl Subscriber {
    pub(crate) fn new(plugin_id: String, handler: Arc<dyn EventHandler>) -> Self {
        Self { plugin_id, handler }
    }

    #[must_use]
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    #[must_use]
    pub fn handler(&self) -> &Arc<dyn EventHandler> {
        &self.handler
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("plugin_id", &self.plugin_id)
            .finish_non_exhaustive()
    }
}
