//! Pure merge functions.
//!
//! Each function takes the previous map by value and returns the next one. The
//! store decides whether that value is a fresh copy (a view still holds the old
//! snapshot) or the same allocation reused, so published snapshots are never
//! mutated in place.

use indexmap::IndexMap;

use crate::sdk::Entity;

/// Ordered-insertion mapping from entity key to the latest snapshot.
pub type EntityMap<T> = IndexMap<String, T>;

/// A normalized batch of changes, the single vocabulary every source speaks.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta<T> {
    /// Clearing upsert: the store becomes exactly this batch.
    Replace(Vec<T>),
    /// Non-clearing upsert: overwrite existing keys, append new ones.
    Upsert(Vec<T>),
    /// Remove these keys; absent keys are ignored.
    Delete(Vec<String>),
}

impl<T> Delta<T> {
    pub fn is_empty(&self) -> bool {
        match self {
            Delta::Replace(_) => false, // Replacing with nothing still clears
            Delta::Upsert(entities) => entities.is_empty(),
            Delta::Delete(keys) => keys.is_empty(),
        }
    }

    /// Keep only the entities matching `keep`. Deletes are untouched.
    pub fn retain(self, keep: impl Fn(&T) -> bool) -> Self {
        match self {
            Delta::Replace(entities) => {
                Delta::Replace(entities.into_iter().filter(|e| keep(e)).collect())
            }
            Delta::Upsert(entities) => {
                Delta::Upsert(entities.into_iter().filter(|e| keep(e)).collect())
            }
            Delta::Delete(keys) => Delta::Delete(keys),
        }
    }
}

/// Apply an upsert batch.
///
/// With `clear_existing` the result holds exactly the batch's keys in batch
/// order. Otherwise existing keys keep their position with the new snapshot and
/// unseen keys are appended. Within one batch a repeated key resolves to its
/// last occurrence.
pub fn merge_upserts<T: Entity>(
    prev: EntityMap<T>,
    batch: Vec<T>,
    clear_existing: bool,
) -> EntityMap<T> {
    let mut next = if clear_existing {
        IndexMap::with_capacity(batch.len())
    } else {
        prev
    };
    for entity in batch {
        next.insert(entity.key().to_owned(), entity);
    }
    next
}

/// Remove the listed keys, preserving the relative order of the rest.
pub fn merge_deletes<T>(mut prev: EntityMap<T>, keys: &[String]) -> EntityMap<T> {
    for key in keys {
        prev.shift_remove(key);
    }
    prev
}

/// Apply any delta.
pub fn merge<T: Entity>(prev: EntityMap<T>, delta: Delta<T>) -> EntityMap<T> {
    match delta {
        Delta::Replace(batch) => merge_upserts(prev, batch, true),
        Delta::Upsert(batch) => merge_upserts(prev, batch, false),
        Delta::Delete(keys) => merge_deletes(prev, &keys),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::Channel;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn named(url: &str, name: &str) -> Channel {
        Channel::group(url, name)
    }

    fn map_of(channels: Vec<Channel>) -> EntityMap<Channel> {
        merge_upserts(EntityMap::new(), channels, true)
    }

    fn keys(map: &EntityMap<Channel>) -> Vec<&str> {
        map.keys().map(String::as_str).collect()
    }

    #[test]
    fn test_upsert_overwrites_in_place_and_appends_new() {
        let prev = map_of(vec![named("a", "A"), named("b", "B")]);
        let next = merge_upserts(prev, vec![named("c", "C"), named("a", "A2")], false);

        assert_eq!(keys(&next), vec!["a", "b", "c"]);
        assert_eq!(next["a"].name, "A2");
    }

    #[test]
    fn test_clearing_upsert_drops_previous_keys() {
        let prev = map_of(vec![named("a", "A"), named("b", "B")]);
        let next = merge_upserts(prev, vec![named("c", "C")], true);
        assert_eq!(keys(&next), vec!["c"]);
    }

    #[test]
    fn test_repeated_key_in_batch_last_wins() {
        let next = map_of(vec![named("a", "first"), named("a", "second")]);
        assert_eq!(next.len(), 1);
        assert_eq!(next["a"].name, "second");
    }

    #[test]
    fn test_delete_preserves_order_of_remaining() {
        let prev = map_of(vec![named("a", ""), named("b", ""), named("c", "")]);
        let next = merge_deletes(prev, &["b".to_string()]);
        assert_eq!(keys(&next), vec!["a", "c"]);
    }

    #[test]
    fn test_delete_absent_key_is_noop() {
        let prev = map_of(vec![named("a", "")]);
        let next = merge_deletes(prev.clone(), &["zzz".to_string()]);
        assert_eq!(next, prev);
    }

    #[test]
    fn test_retain_filters_upserts_only() {
        let mut open = named("o", "");
        open.kind = crate::sdk::ChannelKind::Open;
        let delta = Delta::Upsert(vec![named("g", ""), open]).retain(Channel::is_group);
        assert_eq!(delta, Delta::Upsert(vec![named("g", "")]));

        let delete: Delta<Channel> = Delta::Delete(vec!["o".into()]);
        assert_eq!(delete.clone().retain(|_| false), delete);
    }

    #[test]
    fn test_empty_replace_is_not_empty_delta() {
        assert!(!Delta::<Channel>::Replace(Vec::new()).is_empty());
        assert!(Delta::<Channel>::Upsert(Vec::new()).is_empty());
        assert!(Delta::<Channel>::Delete(Vec::new()).is_empty());
    }

    // ------------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------------

    fn batch_strategy() -> impl Strategy<Value = Vec<Channel>> {
        prop::collection::vec(("[a-f]", "[a-z]{0,4}"), 0..12).prop_map(|pairs| {
            pairs
                .into_iter()
                .map(|(url, name)| named(&url, &name))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_delete_twice_equals_once(
            batch in batch_strategy(),
            doomed in prop::collection::vec("[a-h]", 0..4),
        ) {
            let once = merge_deletes(map_of(batch.clone()), &doomed);
            let twice = merge_deletes(merge_deletes(map_of(batch), &doomed), &doomed);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_later_batch_wins(first in batch_strategy(), second in batch_strategy()) {
            let merged = merge_upserts(
                merge_upserts(EntityMap::new(), first.clone(), false),
                second.clone(),
                false,
            );
            for channel in &second {
                let last = second.iter().rev().find(|c| c.url == channel.url).unwrap();
                prop_assert_eq!(&merged[channel.url.as_str()], last);
            }
            for channel in &first {
                if !second.iter().any(|c| c.url == channel.url) {
                    let last = first.iter().rev().find(|c| c.url == channel.url).unwrap();
                    prop_assert_eq!(&merged[channel.url.as_str()], last);
                }
            }
        }

        #[test]
        fn prop_clearing_and_non_clearing_key_sets(
            existing in batch_strategy(),
            batch in batch_strategy(),
        ) {
            let prev = map_of(existing.clone());
            let prev_keys: BTreeSet<String> = prev.keys().cloned().collect();
            let batch_keys: BTreeSet<String> = batch.iter().map(|c| c.url.clone()).collect();

            let cleared = merge_upserts(prev.clone(), batch.clone(), true);
            let cleared_keys: BTreeSet<String> = cleared.keys().cloned().collect();
            prop_assert_eq!(&cleared_keys, &batch_keys);

            let unioned = merge_upserts(prev, batch, false);
            let unioned_keys: BTreeSet<String> = unioned.keys().cloned().collect();
            let expected: BTreeSet<String> = prev_keys.union(&batch_keys).cloned().collect();
            prop_assert_eq!(unioned_keys, expected);
        }
    }
}
