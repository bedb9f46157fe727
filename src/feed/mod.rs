//! Bulk channel feed.
//!
//! - [`params`] - filter, order and page size for opening a collection
//! - [`coordinator`] - owns the single open collection, drives pagination and
//!   wires the collection's push notifications into a [`crate::events::ChannelSink`]

mod coordinator;
mod params;

pub use coordinator::{CollectionCreator, FeedCoordinator, FeedError, FeedHandle, FeedState};
pub use params::{ChannelOrder, CollectionParams, MemberStateFilter};
