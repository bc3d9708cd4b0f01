use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// A cached value together with the time it was stored.
///
/// Entries are replaced wholesale, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry<V> {
    /// The most recent successful value for the key.
    pub value: V,
    /// When the value was written.
    pub stored_at: Instant,
}

/// The per-key store of most-recent successful results.
///
/// Expiration is lazy: a stale entry stays in the map but reads as absent
/// through [`get`](Self::get) until it is overwritten or invalidated. There
/// is no background sweep.
#[derive(Debug)]
pub struct CacheStore<K, V> {
    entries: Mutex<HashMap<K, StoredEntry<V>>>,
}

impl<K, V> Default for CacheStore<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> CacheStore<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the value for `key` if it was stored no longer than `ttl` ago.
    pub fn get(&self, key: &K, ttl: Duration) -> Option<V> {
        let entries = self.entries.lock().unwrap();
        let entry = entries.get(key)?;
        (entry.stored_at.elapsed() <= ttl).then(|| entry.value.clone())
    }

    /// Returns the value for `key` regardless of its age.
    ///
    /// Used by the mutation path, which computes its optimistic value from
    /// whatever is current, stale or not.
    pub fn peek(&self, key: &K) -> Option<V> {
        let entries = self.entries.lock().unwrap();
        entries.get(key).map(|entry| entry.value.clone())
    }

    /// Replaces the entry for `key`, resetting its stored-at time to now.
    pub fn set(&self, key: K, value: V) {
        let entry = StoredEntry {
            value,
            stored_at: Instant::now(),
        };
        self.entries.lock().unwrap().insert(key, entry);
    }

    /// Removes the entry for `key`.
    pub fn invalidate(&self, key: &K) {
        self.entries.lock().unwrap().remove(key);
    }

    /// Removes all entries.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// Number of entries currently held, stale ones included.
    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Captures the full entry for `key`, stored-at time included.
    pub(crate) fn snapshot(&self, key: &K) -> Option<StoredEntry<V>> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    /// Restores an entry captured by [`snapshot`](Self::snapshot) verbatim.
    ///
    /// Restoring `None` removes the key, so a rollback of a mutation on a
    /// previously absent key leaves it absent.
    pub(crate) fn restore(&self, key: &K, entry: Option<StoredEntry<V>>)
    where
        K: Clone,
    {
        let mut entries = self.entries.lock().unwrap();
        match entry {
            Some(entry) => {
                entries.insert(key.clone(), entry);
            }
            None => {
                entries.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::time;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ttl_boundary() {
        let store = CacheStore::new();
        let ttl = Duration::from_millis(1000);
        store.set("a", 1u32);

        time::advance(Duration::from_millis(999)).await;
        assert_eq!(store.get(&"a", ttl), Some(1));

        time::advance(Duration::from_millis(2)).await;
        assert_eq!(store.get(&"a", ttl), None);
        // stale entries still read through `peek`
        assert_eq!(store.peek(&"a"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_resets_age() {
        let store = CacheStore::new();
        let ttl = Duration::from_millis(100);
        store.set("a", 1u32);

        time::advance(Duration::from_millis(80)).await;
        store.set("a", 2);

        time::advance(Duration::from_millis(80)).await;
        assert_eq!(store.get(&"a", ttl), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_and_clear() {
        let store = CacheStore::new();
        let ttl = Duration::from_secs(10);
        store.set("a", 1u32);
        store.set("b", 2);

        store.invalidate(&"a");
        assert_eq!(store.get(&"a", ttl), None);
        assert_eq!(store.get(&"b", ttl), Some(2));

        store.clear();
        assert_eq!(store.get(&"b", ttl), None);
        assert_eq!(store.entry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_restore_keeps_timestamp() {
        let store = CacheStore::new();
        let ttl = Duration::from_millis(1000);
        store.set("a", 1u32);

        time::advance(Duration::from_millis(900)).await;
        let snapshot = store.snapshot(&"a");
        store.set("a", 2);
        store.restore(&"a", snapshot);

        // the restored entry still expires on the original schedule
        assert_eq!(store.get(&"a", ttl), Some(1));
        time::advance(Duration::from_millis(150)).await;
        assert_eq!(store.get(&"a", ttl), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_absent_removes() {
        let store = CacheStore::new();
        let snapshot = store.snapshot(&"a");
        store.set("a", 1u32);
        store.restore(&"a", snapshot);
        assert_eq!(store.peek(&"a"), None);
    }
}
