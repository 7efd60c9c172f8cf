//! Broadcast bus between the interception layer and every open client
//! instance.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 16;

/// Messages posted to every subscribed client instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstanceMessage {
    /// Connectivity returned; instances should start a sync pass.
    SyncRequired,
    /// A new cache version took over; `purged` lists the removed caches.
    CacheActivated { version: String, purged: Vec<String> },
    /// User-facing notification relayed from a push message.
    Notification { title: String, body: String },
}

/// Fan-out channel for [`InstanceMessage`].
#[derive(Debug, Clone)]
pub struct InstanceBus {
    sender: broadcast::Sender<InstanceMessage>,
}

impl InstanceBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InstanceMessage> {
        self.sender.subscribe()
    }

    /// Post a message. Returns how many instances received it.
    pub fn publish(&self, message: InstanceMessage) -> usize {
        tracing::debug!(?message, "posting to client instances");
        // no subscribers is fine
        self.sender.send(message).unwrap_or(0)
    }
}

impl Default for InstanceBus {
    fn default() -> Self {
        Self::new()
    }
}
