//! Entity store and merge engine.
//!
//! - [`merge`] - pure functions applying a [`Delta`] to an [`EntityMap`]
//! - [`EntityStore`] - copy-on-write owner of the current snapshot

mod entity_store;
mod merge;

pub use entity_store::{Comparator, EntityStore};
pub use merge::{merge, merge_deletes, merge_upserts, Delta, EntityMap};
