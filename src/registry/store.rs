//! Pluggable backing storage for registries
//!
//! [`RegistryStore`] is the concurrent keyed map a [`Registry`](super::Registry)
//! delegates to. The default [`InMemoryRegistryStore`] is backed by a sharded
//! concurrent hash map; embedders with external storage can supply their own
//! implementation.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Concurrent keyed map of registry entries
///
/// All operations are linearizable per key. `values` is a weakly consistent
/// snapshot that tolerates concurrent mutation.
pub trait RegistryStore<E>: Send + Sync {
    /// Return the entry stored under `key`, creating it with `factory` if
    /// absent.
    ///
    /// The factory is invoked at most once per key even under concurrent
    /// access. It runs while the key's shard is held and must not call back
    /// into the store.
    fn compute_if_absent(&self, key: &str, factory: &dyn Fn(&str) -> E) -> E;

    /// Store `value` under `key` unless an entry already exists.
    ///
    /// Returns the pre-existing entry, or `None` when the insert succeeded.
    fn put_if_absent(&self, key: &str, value: E) -> Option<E>;

    /// Look up the entry stored under `key`
    fn find(&self, key: &str) -> Option<E>;

    /// Remove and return the entry stored under `key`
    fn remove(&self, key: &str) -> Option<E>;

    /// Replace the entry stored under `key`, returning the old entry.
    ///
    /// A no-op returning `None` when the key is absent.
    fn replace(&self, key: &str, new_value: E) -> Option<E>;

    /// Snapshot of all stored entries
    fn values(&self) -> Vec<E>;
}

/// Default in-memory [`RegistryStore`] backed by a sharded concurrent map
#[derive(Debug)]
pub struct InMemoryRegistryStore<E> {
    entries: DashMap<String, E>,
}

impl<E> InMemoryRegistryStore<E> {
    /// Create an empty store
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<E> Default for InMemoryRegistryStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> RegistryStore<E> for InMemoryRegistryStore<E>
where
    E: Clone + Send + Sync,
{
    fn compute_if_absent(&self, key: &str, factory: &dyn Fn(&str) -> E) -> E {
        self.entries.entry(key.to_owned()).or_insert_with(|| factory(key)).clone()
    }

    fn put_if_absent(&self, key: &str, value: E) -> Option<E> {
        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(existing) => Some(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(value);
                None
            }
        }
    }

    fn find(&self, key: &str) -> Option<E> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn remove(&self, key: &str) -> Option<E> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    fn replace(&self, key: &str, new_value: E) -> Option<E> {
        self.entries.get_mut(key).map(|mut entry| std::mem::replace(entry.value_mut(), new_value))
    }

    fn values(&self) -> Vec<E> {
        self.entries.iter().map(|entry| entry.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_compute_if_absent_creates_then_reuses() {
        let store: InMemoryRegistryStore<String> = InMemoryRegistryStore::new();
        let calls = AtomicUsize::new(0);

        let factory = |key: &str| {
            calls.fetch_add(1, Ordering::SeqCst);
            format!("entry-{key}")
        };

        assert_eq!(store.compute_if_absent("a", &factory), "entry-a");
        assert_eq!(store.compute_if_absent("a", &factory), "entry-a");
        assert_eq!(calls.load(Ordering::SeqCst), 1, "factory must run at most once per key");
    }

    /// Validates the registry idempotence invariant: concurrent
    /// `compute_if_absent` calls for one key invoke the factory at most once
    /// and every caller observes the same entry.
    #[test]
    fn test_compute_if_absent_concurrent_single_invocation() {
        let store: Arc<InMemoryRegistryStore<usize>> = Arc::new(InMemoryRegistryStore::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let calls = Arc::clone(&calls);
            handles.push(std::thread::spawn(move || {
                store.compute_if_absent("shared", &|_key| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    42
                })
            }));
        }

        let results: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.iter().all(|&value| value == 42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_put_if_absent() {
        let store: InMemoryRegistryStore<i32> = InMemoryRegistryStore::new();

        assert_eq!(store.put_if_absent("k", 1), None);
        assert_eq!(store.put_if_absent("k", 2), Some(1));
        assert_eq!(store.find("k"), Some(1), "second put must not overwrite");
    }

    #[test]
    fn test_find_and_remove() {
        let store: InMemoryRegistryStore<i32> = InMemoryRegistryStore::new();
        store.put_if_absent("k", 5);

        assert_eq!(store.find("k"), Some(5));
        assert_eq!(store.remove("k"), Some(5));
        assert_eq!(store.find("k"), None);
        assert_eq!(store.remove("k"), None);
    }

    #[test]
    fn test_replace_is_noop_when_absent() {
        let store: InMemoryRegistryStore<i32> = InMemoryRegistryStore::new();

        assert_eq!(store.replace("missing", 9), None);
        assert_eq!(store.find("missing"), None);

        store.put_if_absent("k", 1);
        assert_eq!(store.replace("k", 2), Some(1));
        assert_eq!(store.find("k"), Some(2));
    }

    #[test]
    fn test_values_snapshot() {
        let store: InMemoryRegistryStore<i32> = InMemoryRegistryStore::new();
        store.put_if_absent("a", 1);
        store.put_if_absent("b", 2);

        let mut values = store.values();
        values.sort_unstable();
        assert_eq!(values, vec![1, 2]);
        assert_eq!(store.len(), 2);
    }
}
