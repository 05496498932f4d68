//! # Handler Registry
//!
//! Owns the topic → subscriber-list mapping.
//!
//! ## Rules
//!
//! - Subscribers are kept in registration order; dispatch follows that order
//! - `(topic, plugin_id)` is unique: a second registration is ignored and the
//!   first handler is kept (double bootstrap, hot reload)
//! - A topic holds at most `max_per_topic` subscribers
//! - A topic whose last subscriber leaves is removed

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::errors::{SubscribeError, SubscribeResult};
use crate::subscriber::{EventHandler, Subscriber};

/// Outcome of a successful `subscribe` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The subscriber was appended to the topic.
    Added,
    /// `(topic, plugin_id)` was already registered; nothing changed.
    AlreadyRegistered,
}

/// Topic → ordered subscriber list.
pub struct HandlerRegistry {
    topics: RwLock<HashMap<String, Vec<Subscriber>>>,
    max_per_topic: usize,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new(max_per_topic: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            max_per_topic,
        }
    }

    /// Register `handler` for `topic` under `plugin_id`.
    ///
    /// # Errors
    ///
    /// - `SubscribeError::EmptyTopic` / `EmptyPluginId` for empty keys
    /// - `SubscribeError::CapacityExceeded` when the topic is full; the
    ///   handler is not added
    pub fn subscribe(
        &self,
        topic: &str,
        plugin_id: &str,
        handler: Arc<dyn EventHandler>,
    ) -> SubscribeResult<Registration> {
        if topic.is_empty() {
            return Err(SubscribeError::EmptyTopic);
        }
        if plugin_id.is_empty() {
            return Err(SubscribeError::EmptyPluginId);
        }

        let mut topics = self.topics.write();
        let subscribers = topics.entry(topic.to_string()).or_default();

        if subscribers.iter().any(|s| s.plugin_id() == plugin_id) {
            debug!(topic, plugin_id, "Duplicate subscription ignored");
            return Ok(Registration::AlreadyRegistered);
        }

        if subscribers.len() >= self.max_per_topic {
            let limit = self.max_per_topic;
            if subscribers.is_empty() {
                topics.remove(topic);
            }
            return Err(SubscribeError::CapacityExceeded {
                topic: topic.to_string(),
                limit,
            });
        }

        subscribers.push(Subscriber::new(plugin_id.to_string(), handler));
        debug!(
            topic,
            plugin_id,
            subscribers = subscribers.len(),
            "Subscriber registered"
        );
        Ok(Registration::Added)
    }

    /// Remove `plugin_id` from `topic`. Returns whether anything was removed.
    pub fn unsubscribe(&self, topic: &str, plugin_id: &str) -> bool {
        let mut topics = self.topics.write();
        let Some(subscribers) = topics.get_mut(topic) else {
            return false;
        };

        let before = subscribers.len();
        subscribers.retain(|s| s.plugin_id() != plugin_id);
        let removed = subscribers.len() != before;

        if subscribers.is_empty() {
            topics.remove(topic);
        }
        if removed {
            debug!(topic, plugin_id, "Subscriber removed");
        }
        removed
    }

    /// Subscribers for `topic` in registration order (cheap clones).
    #[must_use]
    pub fn handlers_for(&self, topic: &str) -> Vec<Subscriber> {
        self.topics.read().get(topic).cloned().unwrap_or_default()
    }

    /// Point-in-time copy of the whole mapping.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Vec<Subscriber>> {
        self.topics.read().clone()
    }

    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map_or(0, Vec::len)
    }

    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.topics.write().clear();
    }
}
