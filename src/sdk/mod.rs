//! Capabilities consumed from the chat SDK.
//!
//! The engine never talks to a network directly. Everything it needs from the
//! outside world is expressed as a trait here:
//!
//! - **Collections**: paginated, push-capable channel feeds
//!   ([`ChannelCollectionFactory`], [`ChannelCollection`], [`CollectionEventHandler`])
//! - **Lifecycle dispatcher**: per-channel transport callbacks
//!   ([`ChannelEventDispatcher`], [`ChannelHandler`])
//! - **Acknowledgment**: fire-and-forget delivery receipts ([`DeliveryAcknowledger`])
//! - **Member directory**: remote prefix queries for large channels ([`MemberDirectory`])
//!
//! [`memory`] provides in-process implementations of all of them.

pub mod memory;
mod types;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::feed::CollectionParams;

pub use types::{by_latest_activity, Channel, ChannelKind, Entity, Member, MemberState, User};

// ============================================================================
// Error Types
// ============================================================================

/// Failure reported by an SDK collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SdkError {
    /// The request could not reach the server.
    #[error("Network error: {0}")]
    Network(String),
    /// The server rejected the request.
    #[error("Request rejected (code {code}): {message}")]
    Rejected { code: u32, message: String },
    /// The collection was used after `dispose()`.
    #[error("Collection already disposed")]
    Disposed,
}

// ============================================================================
// Collections (bulk feed)
// ============================================================================

/// Push notifications emitted by an open collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CollectionEvent {
    Added { channels: Vec<Channel> },
    Updated { channels: Vec<Channel> },
    Deleted { channel_urls: Vec<String> },
}

/// Receiver of collection push notifications.
pub trait CollectionEventHandler: Send + Sync {
    fn on_channels_added(&self, channels: Vec<Channel>);
    fn on_channels_updated(&self, channels: Vec<Channel>);
    fn on_channels_deleted(&self, channel_urls: Vec<String>);

    /// Route an event value to the matching callback.
    fn dispatch(&self, event: CollectionEvent) {
        match event {
            CollectionEvent::Added { channels } => self.on_channels_added(channels),
            CollectionEvent::Updated { channels } => self.on_channels_updated(channels),
            CollectionEvent::Deleted { channel_urls } => self.on_channels_deleted(channel_urls),
        }
    }
}

/// One open bulk-load subscription inside the SDK.
///
/// Pages come back in the collection's sort order. Once disposed, the
/// collection must stop calling its handler, although the engine does not rely
/// on that and guards handlers itself.
#[async_trait]
pub trait ChannelCollection: Send + Sync {
    fn has_more(&self) -> bool;
    async fn load_more(&mut self) -> Result<Vec<Channel>, SdkError>;
    fn set_event_handler(&mut self, handler: Arc<dyn CollectionEventHandler>);
    fn dispose(&mut self);
}

/// Opens collections configured with filter, order and page size.
pub trait ChannelCollectionFactory: Send + Sync {
    fn create(&self, params: &CollectionParams) -> Box<dyn ChannelCollection>;
}

// ============================================================================
// Lifecycle Dispatcher
// ============================================================================

/// Transport-level channel lifecycle callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelEvent {
    Changed { channel: Channel },
    Frozen { channel: Channel },
    Unfrozen { channel: Channel },
    MemberCountChanged { channels: Vec<Channel> },
    Deleted { channel_url: String },
    UserJoined { channel: Channel, user: User },
    UserLeft { channel: Channel, user: User },
}

pub trait ChannelHandler: Send + Sync {
    fn on_event(&self, event: ChannelEvent);
}

/// Registry of lifecycle handlers keyed by subscriber id.
pub trait ChannelEventDispatcher: Send + Sync {
    fn add_channel_handler(&self, handler_id: &str, handler: Arc<dyn ChannelHandler>);
    fn remove_channel_handler(&self, handler_id: &str);
}

// ============================================================================
// Acknowledgment and Directory
// ============================================================================

/// Sends "delivered" receipts. Duplicates are idempotent on the server side.
#[async_trait]
pub trait DeliveryAcknowledger: Send + Sync {
    async fn mark_as_delivered(&self, channel_url: &str) -> Result<(), SdkError>;
}

/// Server-side member search for channels too large to hold their roster.
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    /// Members of `channel_url` whose nickname starts with `prefix`
    /// (case-insensitive), at most `limit`, in server order.
    async fn query_by_prefix(
        &self,
        channel_url: &str,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<Member>, SdkError>;
}

/// The collaborators a `GroupChannelList` needs, bundled for construction.
#[derive(Clone)]
pub struct ChatServices {
    pub collections: Arc<dyn ChannelCollectionFactory>,
    pub dispatcher: Arc<dyn ChannelEventDispatcher>,
    pub acknowledger: Arc<dyn DeliveryAcknowledger>,
    pub bus: Arc<dyn crate::events::BroadcastBus>,
}
