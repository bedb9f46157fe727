use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::sdk::Channel;

// ============================================================================
// Bus Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusEventKind {
    ChannelUpdated,
    ChannelDeleted,
}

/// Same-process notification published by other parts of the application.
#[derive(Debug, Clone, PartialEq)]
pub enum BusPayload {
    ChannelUpdated { channel: Channel },
    ChannelDeleted { channel_url: String },
}

impl BusPayload {
    pub fn kind(&self) -> BusEventKind {
        match self {
            BusPayload::ChannelUpdated { .. } => BusEventKind::ChannelUpdated,
            BusPayload::ChannelDeleted { .. } => BusEventKind::ChannelDeleted,
        }
    }
}

/// Error published in place of a payload (the publisher's operation failed).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BusError {
    pub message: String,
}

impl BusError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type BusDelivery = Result<BusPayload, BusError>;
pub type BusCallback = Arc<dyn Fn(&BusDelivery) + Send + Sync>;

/// Typed publish/subscribe registry.
pub trait BroadcastBus: Send + Sync {
    /// Register `callback` for `kind`. Dropping (or calling
    /// [`Subscription::unsubscribe`] on) the returned value removes it.
    fn subscribe(
        &self,
        kind: BusEventKind,
        subscriber_id: &str,
        callback: BusCallback,
    ) -> Subscription;
}

// ============================================================================
// Subscription Guard
// ============================================================================

/// Owned unsubscribe action. Runs exactly once: on `unsubscribe()` or on drop.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

// ============================================================================
// In-process Bus
// ============================================================================

struct Entry {
    token: u64,
    kind: BusEventKind,
    subscriber_id: String,
    callback: BusCallback,
}

#[derive(Default)]
struct Registry {
    next_token: u64,
    entries: Vec<Entry>,
}

/// Synchronous in-process bus. Callbacks run on the publisher's thread, in
/// subscription order, outside the registry lock.
#[derive(Clone, Default)]
pub struct InProcessBus {
    registry: Arc<Mutex<Registry>>,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver to every subscriber of `kind`. Returns the number of callbacks run.
    pub fn publish(&self, kind: BusEventKind, delivery: BusDelivery) -> usize {
        let callbacks: Vec<BusCallback> = self
            .registry
            .lock()
            .entries
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| Arc::clone(&e.callback))
            .collect();

        for callback in &callbacks {
            callback(&delivery);
        }
        callbacks.len()
    }

    pub fn publish_payload(&self, payload: BusPayload) -> usize {
        self.publish(payload.kind(), Ok(payload))
    }

    pub fn subscriber_count(&self, kind: BusEventKind) -> usize {
        self.registry
            .lock()
            .entries
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }

    pub fn subscriber_ids(&self) -> Vec<String> {
        self.registry
            .lock()
            .entries
            .iter()
            .map(|e| e.subscriber_id.clone())
            .collect()
    }
}

impl BroadcastBus for InProcessBus {
    fn subscribe(
        &self,
        kind: BusEventKind,
        subscriber_id: &str,
        callback: BusCallback,
    ) -> Subscription {
        let token = {
            let mut registry = self.registry.lock();
            registry.next_token += 1;
            let token = registry.next_token;
            registry.entries.push(Entry {
                token,
                kind,
                subscriber_id: subscriber_id.to_string(),
                callback,
            });
            token
        };
        tracing::debug!(subscriber_id, ?kind, "Bus subscription added");

        let registry = Arc::downgrade(&self.registry);
        let subscriber_id = subscriber_id.to_string();
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.lock().entries.retain(|e| e.token != token);
                tracing::debug!(subscriber_id = %subscriber_id, ?kind, "Bus subscription removed");
            }
        })
    }
}
