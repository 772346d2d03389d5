//! WebSocket subscription routing.
//!
//! Tracks live `eth_subscribe` subscriptions and forwards `eth_subscription`
//! notifications to the receiver registered for each id. Notifications that
//! arrive before the caller has registered (the node may push immediately
//! after answering `eth_subscribe`) are held back and flushed on register.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::mpsc;

/// Upper bound on notifications held for a not-yet-registered subscription.
const MAX_EARLY_NOTIFICATIONS: usize = 64;

/// A unique subscription ID returned by `eth_subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

impl From<String> for SubscriptionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
struct Entries {
    live: HashMap<SubscriptionId, mpsc::UnboundedSender<Value>>,
    early: HashMap<SubscriptionId, Vec<Value>>,
}

/// Routes subscription notifications to their receivers.
#[derive(Clone, Default)]
pub struct SubscriptionManager {
    entries: Arc<Mutex<Entries>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a subscription and return the receiver for its notifications.
    pub fn register(&self, id: SubscriptionId) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut entries = self.lock();
        if let Some(held) = entries.early.remove(&id) {
            for message in held {
                let _ = tx.send(message);
            }
        }
        entries.live.insert(id, tx);
        rx
    }

    /// Forward an incoming notification to the correct subscription.
    pub fn dispatch(&self, id: &SubscriptionId, message: Value) {
        let mut entries = self.lock();
        if let Some(sender) = entries.live.get(id) {
            if sender.send(message).is_err() {
                entries.live.remove(id);
            }
            return;
        }
        let held = entries.early.entry(id.clone()).or_default();
        if held.len() < MAX_EARLY_NOTIFICATIONS {
            held.push(message);
        }
    }

    /// Drop every sender so all receivers observe end-of-stream.
    pub fn close_all(&self) {
        let mut entries = self.lock();
        entries.live.clear();
        entries.early.clear();
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.lock().live.len()
    }

    /// Returns `true` if there are no live subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
