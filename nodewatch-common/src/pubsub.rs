use std::fmt::Display;

use tokio::sync::broadcast;
use tracing::trace;

const DEFAULT_CAPACITY: usize = 128;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    ApiServer,
}

impl Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::ApiServer => f.write_str("apiserver"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    AddApiServerIps,
    DeleteApiServerIps,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEvent {
    pub event_type: EventType,
    pub ips: Vec<String>,
}

impl CacheEvent {
    pub fn new(event_type: EventType, ips: Vec<String>) -> Self {
        Self { event_type, ips }
    }
}

pub trait PubSub: Send + Sync {
    fn publish(&self, topic: Topic, event: CacheEvent);
}

/// In-process bus. Events published while nobody is subscribed are dropped.
#[derive(Clone)]
pub struct BroadcastPubSub {
    tx: broadcast::Sender<(Topic, CacheEvent)>,
}

impl BroadcastPubSub {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(Topic, CacheEvent)> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastPubSub {
    fn default() -> Self {
        Self::new()
    }
}

impl PubSub for BroadcastPubSub {
    fn publish(&self, topic: Topic, event: CacheEvent) {
        if self.tx.send((topic, event)).is_err() {
            trace!(%topic, "no subscribers for event");
        }
    }
}
