//! Bounded cache of open locations.
//!
//! Every entry is either cached (an eviction candidate, ordered by last use)
//! or pinned by an in-flight transaction. Pinned entries are never evicted;
//! unpinning the last holder turns the entry back into a cached one.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use tracing::debug;

/// Default number of cached locations.
pub const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    /// Eviction candidate, last used at the given tick.
    Cached(u64),
    /// Held by this many transactions.
    Pinned(usize),
}

#[derive(Debug)]
struct Entry<L> {
    value: L,
    state: EntryState,
}

#[derive(Debug)]
struct RegistryInner<L> {
    entries: HashMap<String, Entry<L>>,
    /// Cached entries by last-use tick, oldest first.
    lru: BTreeMap<u64, String>,
    tick: u64,
}

impl<L> RegistryInner<L> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn touch(&mut self, id: &str) {
        let tick = self.next_tick();
        if let Some(entry) = self.entries.get_mut(id) {
            if let EntryState::Cached(old) = entry.state {
                self.lru.remove(&old);
                self.lru.insert(tick, id.to_string());
                entry.state = EntryState::Cached(tick);
            }
        }
    }

    fn evict(&mut self, capacity: usize) {
        while self.lru.len() > capacity {
            let Some((_, id)) = self.lru.pop_first() else {
                break;
            };
            self.entries.remove(&id);
            debug!(location = %id, "evicted location from registry");
        }
    }
}

/// Keyed table of locations with LRU eviction.
///
/// A capacity of 0 disables caching: only pinned entries are kept.
#[derive(Debug)]
pub struct LocationRegistry<L> {
    capacity: usize,
    inner: Mutex<RegistryInner<L>>,
}

impl<L: Clone> LocationRegistry<L> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(RegistryInner {
                entries: HashMap::new(),
                lru: BTreeMap::new(),
                tick: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries, cached and pinned.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up an entry, marking it as recently used.
    pub fn get(&self, id: &str) -> Option<L> {
        let mut inner = self.inner.lock();
        let value = inner.entries.get(id)?.value.clone();
        inner.touch(id);
        Some(value)
    }

    /// Cache `value` under `id`, unless an entry exists already.
    ///
    /// Returns the entry that ends up registered, which is the existing one
    /// when another caller got there first.
    pub fn insert(&self, id: &str, value: L) -> L {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get(id) {
            let existing = entry.value.clone();
            inner.touch(id);
            return existing;
        }
        if self.capacity == 0 {
            return value;
        }

        let tick = inner.next_tick();
        inner.lru.insert(tick, id.to_string());
        inner.entries.insert(
            id.to_string(),
            Entry {
                value: value.clone(),
                state: EntryState::Cached(tick),
            },
        );
        inner.evict(self.capacity);
        value
    }

    /// Look up `id`, building and caching the value when it is absent.
    pub fn get_or_try_insert_with<E>(
        &self,
        id: &str,
        build: impl FnOnce() -> Result<L, E>,
    ) -> Result<L, E> {
        if let Some(value) = self.get(id) {
            return Ok(value);
        }
        let value = build()?;
        Ok(self.insert(id, value))
    }

    /// Pin `id` against eviction, registering `value` if it is absent.
    pub fn pin(&self, id: &str, value: L) {
        let mut inner = self.inner.lock();
        match inner.entries.get(id).map(|entry| entry.state) {
            Some(EntryState::Cached(tick)) => {
                inner.lru.remove(&tick);
                if let Some(entry) = inner.entries.get_mut(id) {
                    entry.state = EntryState::Pinned(1);
                }
            }
            Some(EntryState::Pinned(count)) => {
                if let Some(entry) = inner.entries.get_mut(id) {
                    entry.state = EntryState::Pinned(count + 1);
                }
            }
            None => {
                inner.entries.insert(
                    id.to_string(),
                    Entry {
                        value,
                        state: EntryState::Pinned(1),
                    },
                );
            }
        }
    }

    /// Release one pin of `id`.
    ///
    /// The last release returns the entry to the cache, or drops it when
    /// caching is disabled.
    pub fn unpin(&self, id: &str) {
        let mut inner = self.inner.lock();
        let count = match inner.entries.get(id).map(|entry| entry.state) {
            Some(EntryState::Pinned(count)) => count,
            _ => return,
        };

        if count > 1 {
            if let Some(entry) = inner.entries.get_mut(id) {
                entry.state = EntryState::Pinned(count - 1);
            }
            return;
        }

        if self.capacity == 0 {
            inner.entries.remove(id);
            return;
        }

        let tick = inner.next_tick();
        inner.lru.insert(tick, id.to_string());
        if let Some(entry) = inner.entries.get_mut(id) {
            entry.state = EntryState::Cached(tick);
        }
        inner.evict(self.capacity);
    }

    pub fn is_pinned(&self, id: &str) -> bool {
        matches!(
            self.inner.lock().entries.get(id).map(|entry| entry.state),
            Some(EntryState::Pinned(_))
        )
    }

    pub fn is_cached(&self, id: &str) -> bool {
        matches!(
            self.inner.lock().entries.get(id).map(|entry| entry.state),
            Some(EntryState::Cached(_))
        )
    }

    /// Drop a cached entry. Pinned entries stay.
    pub fn forget(&self, id: &str) {
        let mut inner = self.inner.lock();
        if let Some(EntryState::Cached(tick)) = inner.entries.get(id).map(|entry| entry.state) {
            inner.lru.remove(&tick);
            inner.entries.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_eviction() {
        let registry = LocationRegistry::new(2);
        registry.insert("a", 1);
        registry.insert("b", 2);
        assert_eq!(registry.get("a"), Some(1));

        registry.insert("c", 3);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("b"), None);
        assert_eq!(registry.get("a"), Some(1));
        assert_eq!(registry.get("c"), Some(3));
    }

    #[test]
    fn test_insert_keeps_existing() {
        let registry = LocationRegistry::new(4);
        assert_eq!(registry.insert("a", 1), 1);
        assert_eq!(registry.insert("a", 2), 1);
    }

    #[test]
    fn test_pinned_entries_survive_eviction() {
        let registry = LocationRegistry::new(1);
        registry.insert("a", 1);
        registry.pin("a", 1);
        assert!(registry.is_pinned("a"));
        assert!(!registry.is_cached("a"));

        registry.insert("b", 2);
        registry.insert("c", 3);
        assert_eq!(registry.get("a"), Some(1));
        assert_eq!(registry.get("b"), None);

        registry.unpin("a");
        assert!(registry.is_cached("a"));
        // "a" is now the most recent entry, "c" is evicted
        assert_eq!(registry.get("c"), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_nested_pins() {
        let registry = LocationRegistry::new(8);
        registry.pin("a", 1);
        registry.pin("a", 1);
        registry.unpin("a");
        assert!(registry.is_pinned("a"));
        registry.unpin("a");
        assert!(registry.is_cached("a"));
    }

    #[test]
    fn test_zero_capacity_disables_caching() {
        let registry = LocationRegistry::new(0);
        assert_eq!(registry.insert("a", 1), 1);
        assert!(registry.is_empty());

        registry.pin("a", 1);
        assert_eq!(registry.get("a"), Some(1));
        registry.unpin("a");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_forget_only_cached() {
        let registry = LocationRegistry::new(8);
        registry.insert("a", 1);
        registry.pin("b", 2);
        registry.forget("a");
        registry.forget("b");
        assert_eq!(registry.get("a"), None);
        assert_eq!(registry.get("b"), Some(2));
    }

    #[test]
    fn test_get_or_try_insert_with() {
        let registry = LocationRegistry::new(8);
        let value: Result<i32, ()> = registry.get_or_try_insert_with("a", || Ok(7));
        assert_eq!(value, Ok(7));

        let value: Result<i32, ()> = registry.get_or_try_insert_with("a", || Err(()));
        assert_eq!(value, Ok(7));

        let value: Result<i32, &str> = registry.get_or_try_insert_with("b", || Err("boom"));
        assert_eq!(value, Err("boom"));
        assert_eq!(registry.get("b"), None);
    }
}
