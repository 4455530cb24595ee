//! Messaging facade
//!
//! Rules can declare a notification target; after a destination write
//! succeeds the executor publishes a message describing the mirrored object.
//! Real transports (pub/sub, function invocation) are external collaborators
//! behind the [`Notifier`] trait; the in-tree implementations log or record
//! messages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use objmirror_common::Result;

/// Messaging target declared on a rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationTarget {
    /// Topic, queue or function identifier
    pub target: String,

    /// Static attributes merged into every published message
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
}

/// Publishes messages to a downstream messaging fabric
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publish a message, returning the transport's message id
    async fn publish(
        &self,
        target: &NotificationTarget,
        body: Value,
        attributes: &HashMap<String, String>,
    ) -> Result<String>;
}

/// Notifier that logs messages and fabricates ids; the default for the CLI
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn publish(
        &self,
        target: &NotificationTarget,
        body: Value,
        _attributes: &HashMap<String, String>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        info!(target = %target.target, message_id = %id, "published {}", body);
        Ok(id)
    }
}

/// A message recorded by [`MemNotifier`]
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub id: String,
    pub target: String,
    pub body: Value,
    pub attributes: HashMap<String, String>,
}

/// In-memory notifier capturing published messages for tests
#[derive(Debug, Default)]
pub struct MemNotifier {
    messages: Mutex<Vec<PublishedMessage>>,
    sequence: AtomicU64,
}

impl MemNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message published so far
    pub fn messages(&self) -> Vec<PublishedMessage> {
        match self.messages.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Notifier for MemNotifier {
    async fn publish(
        &self,
        target: &NotificationTarget,
        body: Value,
        attributes: &HashMap<String, String>,
    ) -> Result<String> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let id = format!("msg-{:06}", sequence);
        let mut merged = target.attributes.clone();
        merged.extend(attributes.clone());
        let message = PublishedMessage {
            id: id.clone(),
            target: target.target.clone(),
            body,
            attributes: merged,
        };
        match self.messages.lock() {
            Ok(mut guard) => guard.push(message),
            Err(poisoned) => poisoned.into_inner().push(message),
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mem_notifier_records_messages() {
        let notifier = MemNotifier::new();
        let target = NotificationTarget {
            target: "topic-a".to_string(),
            attributes: HashMap::from([("static".to_string(), "1".to_string())]),
        };
        let attributes = HashMap::from([("event".to_string(), "finalize".to_string())]);

        let id = notifier
            .publish(&target, json!({"url": "mem://src/a"}), &attributes)
            .await
            .unwrap();

        let messages = notifier.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, id);
        assert_eq!(messages[0].target, "topic-a");
        assert_eq!(messages[0].attributes.get("static"), Some(&"1".to_string()));
        assert_eq!(
            messages[0].attributes.get("event"),
            Some(&"finalize".to_string())
        );
    }
}
