//! Client-side chat channel list engine.
//!
//! - [`list::GroupChannelList`] keeps one consistent, ordered view of the
//!   viewer's group channels, merging paginated pages with live updates from
//!   the collection, the broadcast bus and the lifecycle dispatcher.
//! - [`mention::MentionSuggestion`] turns composer input into debounced,
//!   superseding member searches.
//!
//! Everything the engine needs from the chat SDK is a trait in [`sdk`];
//! [`sdk::memory`] implements them in-process.

pub mod config;
pub mod events;
pub mod feed;
pub mod list;
pub mod mention;
pub mod scenario;
pub mod sdk;
pub mod store;

pub use list::{GroupChannelList, ListError, ListOptions, ListStatus};
pub use mention::{MentionConfig, MentionInput, MentionSuggestion};
