use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, Weak};

use crate::config::FetchOptions;
use crate::error::FetchError;

/// A state change delivered to the subscribers of a key.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent<V> {
    /// An operation for the key has started.
    ///
    /// Emitted once per operation, no matter how many consumers joined it.
    /// Internal retry attempts do not re-emit this.
    Loading,
    /// The key settled with a fresh value, either from a fetch or a
    /// mutation write.
    Ready(V),
    /// The key's operation settled with a terminal error.
    ///
    /// Emitted at most once per operation lifecycle.
    Failed(FetchError),
}

type Callback<V> = Arc<dyn Fn(&ResourceEvent<V>) + Send + Sync>;

struct Slot<V> {
    id: u64,
    options: FetchOptions,
    callback: Callback<V>,
}

struct Inner<K, V> {
    subscribers: HashMap<K, Vec<Slot<V>>>,
    next_id: u64,
}

/// Tracks interested consumers per key and fans state changes out to them.
///
/// Fan-out is synchronous and in registration order within a key; there is
/// no defined ordering between different keys. A key's subscriber list may
/// be empty while a cache entry or an in-flight operation for it still
/// exists.
pub struct SubscriptionRegistry<K, V> {
    inner: Arc<Mutex<Inner<K, V>>>,
}

impl<K, V> std::fmt::Debug for SubscriptionRegistry<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys = self
            .inner
            .try_lock()
            .map(|inner| inner.subscribers.len())
            .unwrap_or_default();
        f.debug_struct("SubscriptionRegistry")
            .field("keys", &keys)
            .finish()
    }
}

impl<K, V> Default for SubscriptionRegistry<K, V> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                subscribers: HashMap::new(),
                next_id: 0,
            })),
        }
    }
}

impl<K, V> SubscriptionRegistry<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber for `key`.
    ///
    /// The returned handle removes the subscriber when dropped or explicitly
    /// unsubscribed. The `options` are remembered for wake-triggered
    /// refetches of this key.
    pub fn subscribe(
        &self,
        key: K,
        options: FetchOptions,
        callback: impl Fn(&ResourceEvent<V>) + Send + Sync + 'static,
    ) -> Subscription<K, V> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.entry(key.clone()).or_default().push(Slot {
            id,
            options,
            callback: Arc::new(callback),
        });

        Subscription {
            key,
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Delivers `event` to every subscriber of `key`, in registration order.
    ///
    /// Callbacks run outside the registry lock, so they may subscribe or
    /// unsubscribe while being notified.
    pub fn notify(&self, key: &K, event: &ResourceEvent<V>) {
        let callbacks: Vec<Callback<V>> = {
            let inner = self.inner.lock().unwrap();
            match inner.subscribers.get(key) {
                Some(slots) => slots.iter().map(|slot| Arc::clone(&slot.callback)).collect(),
                None => return,
            }
        };

        for callback in callbacks {
            callback(event);
        }
    }

    /// Keys with at least one active subscriber.
    pub fn active_keys(&self) -> Vec<K> {
        let inner = self.inner.lock().unwrap();
        inner
            .subscribers
            .iter()
            .filter(|(_, slots)| !slots.is_empty())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Keys eligible for a wake-triggered refetch, paired with the options
    /// of their earliest-registered wake-enabled subscriber.
    pub fn wake_targets(&self) -> Vec<(K, FetchOptions)> {
        let inner = self.inner.lock().unwrap();
        inner
            .subscribers
            .iter()
            .filter_map(|(key, slots)| {
                let slot = slots.iter().find(|slot| slot.options.refetch_on_wake)?;
                Some((key.clone(), slot.options))
            })
            .collect()
    }

    /// Number of active subscribers for `key`.
    pub fn subscriber_count(&self, key: &K) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.subscribers.get(key).map_or(0, Vec::len)
    }
}

/// A live registration of one subscriber for one key.
///
/// Dropping the handle (or calling [`unsubscribe`](Self::unsubscribe))
/// removes the subscriber from notification. It does *not* cancel an
/// in-flight operation for the key; that runs to completion and its result
/// stays cached for future consumers.
pub struct Subscription<K: Eq + Hash, V> {
    key: K,
    id: u64,
    registry: Weak<Mutex<Inner<K, V>>>,
}

impl<K: Eq + Hash, V> Subscription<K, V> {
    /// The observed key.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Removes this subscriber.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl<K: Eq + Hash, V> Drop for Subscription<K, V> {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut inner = registry.lock().unwrap();
        if let Some(slots) = inner.subscribers.get_mut(&self.key) {
            slots.retain(|slot| slot.id != self.id);
            if slots.is_empty() {
                inner.subscribers.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_callback(
        log: &Arc<Mutex<Vec<(&'static str, ResourceEvent<u32>)>>>,
        tag: &'static str,
    ) -> impl Fn(&ResourceEvent<u32>) + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |event| log.lock().unwrap().push((tag, event.clone()))
    }

    #[test]
    fn test_fanout_in_registration_order() {
        let registry = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let _a = registry.subscribe("key", FetchOptions::default(), log_callback(&log, "a"));
        let _b = registry.subscribe("key", FetchOptions::default(), log_callback(&log, "b"));

        registry.notify(&"key", &ResourceEvent::Loading);
        registry.notify(&"key", &ResourceEvent::Ready(1));

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                ("a", ResourceEvent::Loading),
                ("b", ResourceEvent::Loading),
                ("a", ResourceEvent::Ready(1)),
                ("b", ResourceEvent::Ready(1)),
            ]
        );
    }

    #[test]
    fn test_unsubscribe_on_drop() {
        let registry = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let a = registry.subscribe("key", FetchOptions::default(), log_callback(&log, "a"));
        assert_eq!(registry.subscriber_count(&"key"), 1);
        assert_eq!(registry.active_keys(), vec!["key"]);

        drop(a);
        assert_eq!(registry.subscriber_count(&"key"), 0);
        assert!(registry.active_keys().is_empty());

        registry.notify(&"key", &ResourceEvent::Ready(1));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_notify_untracked_key_is_noop() {
        let registry: SubscriptionRegistry<&str, u32> = SubscriptionRegistry::new();
        registry.notify(&"nobody", &ResourceEvent::Loading);
    }

    #[test]
    fn test_wake_targets_respect_opt_out() {
        let registry: SubscriptionRegistry<&str, u32> = SubscriptionRegistry::new();
        let silent = FetchOptions {
            refetch_on_wake: false,
            ..Default::default()
        };

        let _a = registry.subscribe("wake", FetchOptions::default(), |_| {});
        let _b = registry.subscribe("sleep", silent, |_| {});

        let targets = registry.wake_targets();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].0, "wake");
        // the opted-out key still counts as actively observed
        assert_eq!(registry.active_keys().len(), 2);
    }

    #[test]
    fn test_wake_options_from_earliest_wake_subscriber() {
        let registry: SubscriptionRegistry<&str, u32> = SubscriptionRegistry::new();
        let silent = FetchOptions {
            refetch_on_wake: false,
            ..Default::default()
        };
        let eager = FetchOptions {
            ttl: std::time::Duration::from_secs(5),
            ..Default::default()
        };

        let _a = registry.subscribe("key", silent, |_| {});
        let _b = registry.subscribe("key", eager, |_| {});

        let targets = registry.wake_targets();
        assert_eq!(targets, vec![("key", eager)]);
    }
}
