use std::cmp::Ordering;
use std::sync::Arc;

use super::merge::{merge, Delta, EntityMap};
use crate::sdk::Entity;

/// Caller-supplied total order used when projecting the store into a list.
pub type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Authoritative mapping from key to the most recently merged entity.
///
/// The map lives in an `Arc` and every mutation produces a new `Arc`. A caller
/// holding a [`snapshot`](Self::snapshot) keeps seeing the map as it was; the
/// merge only reuses the allocation when nobody else holds it.
pub struct EntityStore<T> {
    entries: Arc<EntityMap<T>>,
}

impl<T> Default for EntityStore<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(EntityMap::default()),
        }
    }
}

impl<T: Entity> EntityStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a batch. See [`merge_upserts`](super::merge_upserts).
    pub fn apply_upserts(&mut self, entities: Vec<T>, clear_existing: bool) {
        let delta = if clear_existing {
            Delta::Replace(entities)
        } else {
            Delta::Upsert(entities)
        };
        self.apply(delta);
    }

    /// Remove keys. Removing an absent key leaves the snapshot untouched.
    pub fn apply_deletes(&mut self, keys: &[String]) {
        if keys.iter().any(|k| self.entries.contains_key(k)) {
            self.apply(Delta::Delete(keys.to_vec()));
        }
    }

    pub fn apply(&mut self, delta: Delta<T>) {
        let current = std::mem::take(&mut self.entries);
        self.entries = Arc::new(merge(Arc::unwrap_or_clone(current), delta));
    }

    /// Project the mapping into a sequence.
    ///
    /// Without a comparator the sequence follows insertion order. With one, the
    /// sort is stable so ties keep insertion order.
    pub fn view(&self, comparator: Option<&Comparator<T>>) -> Vec<T> {
        let mut items: Vec<T> = self.entries.values().cloned().collect();
        if let Some(cmp) = comparator {
            items.sort_by(|a, b| cmp(a, b));
        }
        items
    }

    pub fn snapshot(&self) -> Arc<EntityMap<T>> {
        Arc::clone(&self.entries)
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::Channel;

    fn urls(channels: &[Channel]) -> Vec<&str> {
        channels.iter().map(|c| c.url.as_str()).collect()
    }

    #[test]
    fn test_view_defaults_to_insertion_order() {
        let mut store = EntityStore::new();
        store.apply_upserts(
            vec![Channel::group("c2", "b"), Channel::group("c1", "a")],
            true,
        );
        store.apply_upserts(vec![Channel::group("c3", "c")], false);
        assert_eq!(urls(&store.view(None)), vec!["c2", "c1", "c3"]);
    }

    #[test]
    fn test_view_with_comparator_is_stable() {
        let mut store = EntityStore::new();
        store.apply_upserts(
            vec![
                Channel::group("x", "same"),
                Channel::group("a", "first"),
                Channel::group("y", "same"),
            ],
            true,
        );
        let by_name: Comparator<Channel> = Arc::new(|a, b| a.name.cmp(&b.name));
        assert_eq!(urls(&store.view(Some(&by_name))), vec!["a", "x", "y"]);
    }

    #[test]
    fn test_snapshot_is_not_affected_by_later_merges() {
        let mut store = EntityStore::new();
        store.apply_upserts(vec![Channel::group("c1", "one")], true);
        let before = store.snapshot();

        store.apply_upserts(vec![Channel::group("c1", "renamed")], false);
        store.apply_deletes(&["c1".to_string()]);

        assert_eq!(before.len(), 1);
        assert_eq!(before["c1"].name, "one");
        assert!(store.is_empty());
    }

    #[test]
    fn test_delete_of_absent_key_keeps_snapshot_identity() {
        let mut store = EntityStore::new();
        store.apply_upserts(vec![Channel::group("c1", "")], true);
        let before = store.snapshot();
        store.apply_deletes(&["missing".to_string()]);
        assert!(Arc::ptr_eq(&before, &store.snapshot()));
    }

    #[test]
    fn test_delete_twice_same_as_once() {
        let mut store = EntityStore::new();
        store.apply_upserts(vec![Channel::group("c1", ""), Channel::group("c2", "")], true);
        store.apply_deletes(&["c1".to_string()]);
        let once = store.view(None);
        store.apply_deletes(&["c1".to_string()]);
        assert_eq!(store.view(None), once);
        assert!(!store.contains_key("c1"));
        assert_eq!(store.get("c2").map(|c| c.url.as_str()), Some("c2"));
    }
}
