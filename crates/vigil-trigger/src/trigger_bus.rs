//! Pub/sub bus contract used to keep peer processes' caches consistent.
//!
//! Delivery is at-least-once with per-topic ordering from one publisher;
//! consumers apply idempotent handlers keyed by trigger id, so redelivery is
//! harmless. `InProcessTriggerBus` serves single-process deployments and
//! tests; multi-process deployments plug an external broker in behind the
//! same trait.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::trigger_errors::TriggerError;
use crate::trigger_model::{Trigger, TriggerId};

/// Topic carrying global-bucket cache mutations.
pub const TRIGGER_CACHE_TOPIC: &str = "vigil.trigger-cache.global";

pub const CACHE_BROADCAST_SCHEMA_VERSION: u32 = 1;

const DEFAULT_TOPIC_CAPACITY: usize = 256;

fn cache_broadcast_schema_version() -> u32 {
    CACHE_BROADCAST_SCHEMA_VERSION
}

pub type BusHandler = Arc<dyn Fn(Value) + Send + Sync>;

#[async_trait]
/// Trait contract for `TriggerBus` behavior.
pub trait TriggerBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), TriggerError>;

    /// Registers a handler for every payload subsequently published on
    /// `topic`. Handlers must be cheap and non-blocking.
    fn subscribe(&self, topic: &str, handler: BusHandler);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Envelope mirrored to peer processes for each global cache mutation.
pub struct CacheBroadcast {
    #[serde(default = "cache_broadcast_schema_version")]
    pub schema_version: u32,
    /// Identifies the publishing cache so it can skip its own echo.
    pub origin: String,
    pub event: CacheBroadcastEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
/// Enumerates supported `CacheBroadcastEvent` values.
pub enum CacheBroadcastEvent {
    Upsert { trigger: Trigger },
    Remove { id: TriggerId },
}

/// In-process `TriggerBus` over `tokio::sync::broadcast` channels, one per
/// topic.
pub struct InProcessTriggerBus {
    topics: Mutex<HashMap<String, broadcast::Sender<Value>>>,
    capacity: usize,
}

impl InProcessTriggerBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<Value> {
        let mut topics = self.topics.lock().expect("bus topics lock poisoned");
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for InProcessTriggerBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TriggerBus for InProcessTriggerBus {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), TriggerError> {
        // A send with no subscribers is not a failure; the topic simply has
        // no peers yet.
        let _ = self.sender_for(topic).send(payload);
        Ok(())
    }

    fn subscribe(&self, topic: &str, handler: BusHandler) {
        let mut receiver = self.sender_for(topic).subscribe();
        let topic = topic.to_string();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(payload) => handler(payload),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(%topic, skipped, "bus subscriber lagged; messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}
