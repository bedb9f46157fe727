//! Live update sources and their normalization.
//!
//! Three sources feed a channel list besides bulk pages:
//!
//! - the collection's own push notifications (wired by the feed coordinator)
//! - the in-process broadcast bus ([`BroadcastBus`])
//! - the transport lifecycle dispatcher ([`crate::sdk::ChannelEventDispatcher`])
//!
//! Each is normalized into a [`ChannelDelta`] and handed to a [`ChannelSink`].

mod bus;
mod fan_in;

pub use bus::{
    BroadcastBus, BusCallback, BusDelivery, BusError, BusEventKind, BusPayload, InProcessBus,
    Subscription,
};
pub use fan_in::{from_bus, from_channel_event, from_collection, FanIn, HandlerRegistration};

use crate::sdk::Channel;
use crate::store::Delta;

pub type ChannelDelta = Delta<Channel>;

/// Where a delta came from. Used for logging only; every source merges the
/// same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaSource {
    /// A bulk page from the feed coordinator.
    Page,
    /// A push notification from the open collection.
    Collection,
    Bus,
    Dispatcher,
    /// An update handed in by the UI.
    External,
}

/// Destination of normalized deltas, implemented by the list that owns the store.
pub trait ChannelSink: Send + Sync {
    fn apply(&self, delta: ChannelDelta, source: DeltaSource);

    /// User id of the viewer, needed to tell "I left" from "someone left".
    fn viewer_id(&self) -> Option<String>;
}
