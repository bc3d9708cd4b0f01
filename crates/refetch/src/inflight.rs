use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::error::FetchResult;

/// The settled-or-pending result of an in-flight operation, shared by every
/// consumer that joined it.
pub type SharedFetch<V> = Shared<BoxFuture<'static, FetchResult<V>>>;

struct Pending<V> {
    result: SharedFetch<V>,
    joins: usize,
}

type PendingMap<K, V> = Mutex<HashMap<K, Pending<V>>>;

/// Tracks in-flight operations per key so concurrent requesters share a
/// single underlying loader invocation.
///
/// At most one operation exists per key at any time. A newly started
/// operation is spawned onto the runtime, so it runs to completion even when
/// every consumer that joined it has been dropped; the result still ends up
/// in the cache for future consumers.
pub struct InflightRegistry<K, V> {
    pending: Arc<PendingMap<K, V>>,
}

impl<K, V> std::fmt::Debug for InflightRegistry<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending = self
            .pending
            .try_lock()
            .map(|p| p.len())
            .unwrap_or_default();
        f.debug_struct("InflightRegistry")
            .field("pending", &pending)
            .finish()
    }
}

impl<K, V> Default for InflightRegistry<K, V> {
    fn default() -> Self {
        Self {
            pending: Default::default(),
        }
    }
}

impl<K, V> InflightRegistry<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            pending: Default::default(),
        }
    }

    /// Joins the in-flight operation for `key`, or starts a new one produced
    /// by `start`.
    ///
    /// The registry entry is removed the instant the operation settles,
    /// *before* its result becomes observable to any joiner. A request
    /// issued right after settlement therefore starts a fresh operation
    /// instead of joining a finished one.
    ///
    /// The returned future can be dropped without consequence; the operation
    /// itself keeps running on the runtime.
    pub fn load<F>(&self, key: K, start: impl FnOnce() -> F) -> SharedFetch<V>
    where
        F: Future<Output = FetchResult<V>> + Send + 'static,
    {
        let mut pending = self.pending.lock().unwrap();
        if let Some(op) = pending.get_mut(&key) {
            op.joins += 1;
            tracing::trace!(joins = op.joins, "joining in-flight operation");
            return op.result.clone();
        }

        let work = start();
        let registry = Arc::clone(&self.pending);
        let settle_key = key.clone();
        let result = async move {
            let result = work.await;
            // Unregister before the result can be observed by joiners.
            registry.lock().unwrap().remove(&settle_key);
            result
        }
        .boxed()
        .shared();

        pending.insert(
            key,
            Pending {
                result: result.clone(),
                joins: 1,
            },
        );
        tokio::spawn(result.clone().map(|_| ()));

        result
    }

    /// Number of consumers that joined the in-flight operation for `key`,
    /// or 0 if none is pending.
    pub fn join_count(&self, key: &K) -> usize {
        self.pending
            .lock()
            .unwrap()
            .get(key)
            .map_or(0, |op| op.joins)
    }

    /// Whether an operation for `key` is currently in flight.
    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.lock().unwrap().contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::time;

    use super::*;
    use crate::error::FetchError;

    #[tokio::test(start_paused = true)]
    async fn test_coalescing() {
        let registry = InflightRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let start = |calls: &Arc<AtomicUsize>| {
            let calls = Arc::clone(calls);
            move || async move {
                let call = calls.fetch_add(1, Ordering::Relaxed);
                time::sleep(Duration::from_millis(10)).await;
                Ok(call)
            }
        };

        let a = registry.load("key", start(&calls));
        let b = registry.load("key", start(&calls));
        let c = registry.load("key", start(&calls));
        assert_eq!(registry.join_count(&"key"), 3);

        let res = futures::join!(a, b, c);
        assert_eq!(res, (Ok(0), Ok(0), Ok(0)));
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        // settled operations are gone; the next load starts fresh
        assert!(!registry.is_pending(&"key"));
        let d = registry.load("key", start(&calls)).await;
        assert_eq!(d, Ok(1));
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_shared() {
        let registry: InflightRegistry<&str, u32> = InflightRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let start = || {
            let calls = Arc::clone(&calls);
            move || async move {
                calls.fetch_add(1, Ordering::Relaxed);
                time::sleep(Duration::from_millis(10)).await;
                Err(FetchError::Terminal("gone".into()))
            }
        };

        let a = registry.load("key", start());
        let b = registry.load("key", start());
        let res = futures::join!(a, b);
        assert_eq!(res.0, res.1);
        assert_eq!(res.0, Err(FetchError::Terminal("gone".into())));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_to_completion_without_joiners() {
        let registry: InflightRegistry<&str, u32> = InflightRegistry::new();
        let done = Arc::new(AtomicUsize::new(0));

        let handle = registry.load("key", {
            let done = Arc::clone(&done);
            move || async move {
                time::sleep(Duration::from_millis(10)).await;
                done.fetch_add(1, Ordering::Relaxed);
                Ok(7)
            }
        });
        drop(handle);

        time::sleep(Duration::from_millis(20)).await;
        assert_eq!(done.load(Ordering::Relaxed), 1);
        assert!(!registry.is_pending(&"key"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_do_not_coalesce() {
        let registry = InflightRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let start = |value: u32| {
            let calls = Arc::clone(&calls);
            move || async move {
                calls.fetch_add(1, Ordering::Relaxed);
                Ok(value)
            }
        };

        let a = registry.load("a", start(1));
        let b = registry.load("b", start(2));
        let res = futures::join!(a, b);
        assert_eq!(res, (Ok(1), Ok(2)));
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }
}
