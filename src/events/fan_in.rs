use std::sync::{Arc, Weak};

use super::bus::{BroadcastBus, BusDelivery, BusEventKind, BusPayload, Subscription};
use super::{ChannelDelta, ChannelSink, DeltaSource};
use crate::sdk::{ChannelEvent, ChannelEventDispatcher, ChannelHandler, CollectionEvent};
use crate::store::Delta;

// ============================================================================
// Normalization
// ============================================================================

/// Collection push notification → delta.
pub fn from_collection(event: CollectionEvent) -> ChannelDelta {
    match event {
        CollectionEvent::Added { channels } | CollectionEvent::Updated { channels } => {
            Delta::Upsert(channels)
        }
        CollectionEvent::Deleted { channel_urls } => Delta::Delete(channel_urls),
    }
}

/// Bus delivery → delta. Error deliveries and payloads of the wrong kind are
/// logged and dropped.
pub fn from_bus(kind: BusEventKind, delivery: &BusDelivery) -> Option<ChannelDelta> {
    match (kind, delivery) {
        (BusEventKind::ChannelUpdated, Ok(BusPayload::ChannelUpdated { channel })) => {
            Some(Delta::Upsert(vec![channel.clone()]))
        }
        (BusEventKind::ChannelDeleted, Ok(BusPayload::ChannelDeleted { channel_url })) => {
            Some(Delta::Delete(vec![channel_url.clone()]))
        }
        (BusEventKind::ChannelUpdated, Err(e)) => {
            tracing::warn!(error = %e, "Cannot update channels, dropping bus event");
            None
        }
        (BusEventKind::ChannelDeleted, Err(e)) => {
            tracing::warn!(error = %e, "Cannot delete channels, dropping bus event");
            None
        }
        (kind, Ok(payload)) => {
            tracing::warn!(
                ?kind,
                payload_kind = ?payload.kind(),
                "Bus payload does not match subscription kind, dropping"
            );
            None
        }
    }
}

/// Lifecycle callback → delta.
///
/// Everything is an upsert except channel deletion and the viewer's own
/// departure, which both remove the channel from the viewer's list.
pub fn from_channel_event(event: ChannelEvent, viewer_id: Option<&str>) -> ChannelDelta {
    match event {
        ChannelEvent::Changed { channel }
        | ChannelEvent::Frozen { channel }
        | ChannelEvent::Unfrozen { channel }
        | ChannelEvent::UserJoined { channel, .. } => Delta::Upsert(vec![channel]),
        ChannelEvent::MemberCountChanged { channels } => Delta::Upsert(channels),
        ChannelEvent::Deleted { channel_url } => Delta::Delete(vec![channel_url]),
        ChannelEvent::UserLeft { channel, user } => {
            if viewer_id == Some(user.user_id.as_str()) {
                Delta::Delete(vec![channel.url])
            } else {
                Delta::Upsert(vec![channel])
            }
        }
    }
}

// ============================================================================
// Dispatcher Registration
// ============================================================================

/// Lifecycle handler registered under an id; removed on `unregister()` or drop.
pub struct HandlerRegistration {
    dispatcher: Arc<dyn ChannelEventDispatcher>,
    handler_id: String,
    active: bool,
}

impl HandlerRegistration {
    pub fn register(
        dispatcher: Arc<dyn ChannelEventDispatcher>,
        handler_id: &str,
        handler: Arc<dyn ChannelHandler>,
    ) -> Self {
        dispatcher.add_channel_handler(handler_id, handler);
        Self {
            dispatcher,
            handler_id: handler_id.to_string(),
            active: true,
        }
    }

    pub fn handler_id(&self) -> &str {
        &self.handler_id
    }

    pub fn unregister(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.active {
            self.active = false;
            self.dispatcher.remove_channel_handler(&self.handler_id);
        }
    }
}

impl Drop for HandlerRegistration {
    fn drop(&mut self) {
        self.release();
    }
}

struct DispatcherRouter {
    sink: Weak<dyn ChannelSink>,
}

impl ChannelHandler for DispatcherRouter {
    fn on_event(&self, event: ChannelEvent) {
        let Some(sink) = self.sink.upgrade() else {
            return;
        };
        let viewer = sink.viewer_id();
        let delta = from_channel_event(event, viewer.as_deref());
        sink.apply(delta, DeltaSource::Dispatcher);
    }
}

// ============================================================================
// Fan-in
// ============================================================================

/// Live subscriptions to the bus and dispatcher for one list instance.
///
/// Connected once at construction, disconnected exactly once: by
/// [`disconnect`](Self::disconnect) or on drop, whichever comes first. The
/// collection source is not held here; the feed coordinator wires it per handle.
pub struct FanIn {
    subscriber_id: String,
    subscriptions: Vec<Subscription>,
    registration: Option<HandlerRegistration>,
}

impl FanIn {
    pub fn connect(
        subscriber_id: &str,
        bus: &dyn BroadcastBus,
        dispatcher: Arc<dyn ChannelEventDispatcher>,
        sink: Weak<dyn ChannelSink>,
    ) -> Self {
        let subscriptions = [BusEventKind::ChannelUpdated, BusEventKind::ChannelDeleted]
            .into_iter()
            .map(|kind| {
                let sink = Weak::clone(&sink);
                bus.subscribe(
                    kind,
                    subscriber_id,
                    Arc::new(move |delivery: &BusDelivery| {
                        let Some(delta) = from_bus(kind, delivery) else {
                            return;
                        };
                        if let Some(sink) = sink.upgrade() {
                            sink.apply(delta, DeltaSource::Bus);
                        }
                    }),
                )
            })
            .collect();

        let registration = HandlerRegistration::register(
            dispatcher,
            subscriber_id,
            Arc::new(DispatcherRouter { sink }),
        );

        tracing::debug!(subscriber_id, "Connected live update sources");
        Self {
            subscriber_id: subscriber_id.to_string(),
            subscriptions,
            registration: Some(registration),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.registration.is_some()
    }

    pub fn disconnect(&mut self) {
        if !self.is_connected() {
            return;
        }
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        if let Some(registration) = self.registration.take() {
            registration.unregister();
        }
        tracing::debug!(subscriber_id = %self.subscriber_id, "Disconnected live update sources");
    }
}

impl Drop for FanIn {
    fn drop(&mut self) {
        self.disconnect();
    }
}
