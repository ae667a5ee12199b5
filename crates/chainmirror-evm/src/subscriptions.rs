//! Live `eth_subscribe` streams owned by the WebSocket task.
//!
//! Subscriptions do not survive a disconnect: [`SubscriptionManager::clear`]
//! drops every sender so the consumer streams end, and the caller subscribes
//! again on the new connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;

/// A unique subscription ID returned by `eth_subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Default)]
pub struct SubscriptionManager {
    entries: Arc<Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<Value>>>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: SubscriptionId, sender: mpsc::UnboundedSender<Value>) {
        self.entries.lock().unwrap().insert(id, sender);
    }

    /// Forward a notification. Subscriptions whose consumer went away are removed.
    pub fn dispatch(&self, id: &SubscriptionId, message: Value) {
        let mut entries = self.entries.lock().unwrap();
        let closed = match entries.get(id) {
            Some(sender) => sender.send(message).is_err(),
            None => {
                tracing::debug!(subscription = %id, "notification for unknown subscription");
                false
            }
        };
        if closed {
            entries.remove(id);
        }
    }

    /// Drop every subscription; consumer streams end.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
