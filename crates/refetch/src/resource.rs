use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use crate::config::FetchOptions;
use crate::error::{FetchError, FetchResult};
use crate::inflight::{InflightRegistry, SharedFetch};
use crate::retry::retry;
use crate::store::CacheStore;
use crate::subscription::{ResourceEvent, Subscription, SubscriptionRegistry};

/// The seam between the cache and its environment.
///
/// The driver supplies the asynchronous loader for a key; the cache stays
/// agnostic to the transport behind it. A fetch is one *attempt*: the retry
/// controller invokes it again on transient failures. The error variant a
/// driver produces is its retry classification, see [`FetchError`].
///
/// [`FetchError`]: crate::FetchError
pub trait FetchDriver: Send + Sync + 'static {
    /// The key a resource is addressed by.
    type Key: Clone + Eq + Hash + Send + Sync + 'static;
    /// The resource value. Cloned into every consumer.
    type Value: Clone + Send + Sync + 'static;

    /// Performs one attempt at loading the value for `key`.
    fn fetch(&self, key: &Self::Key) -> BoxFuture<'static, FetchResult<Self::Value>>;
}

/// Drivers are usable behind a shared handle, so callers can keep their own
/// reference to the driver (e.g. for inspection in tests) while the cache
/// owns a clone.
impl<D: FetchDriver + ?Sized> FetchDriver for Arc<D> {
    type Key = D::Key;
    type Value = D::Value;

    fn fetch(&self, key: &Self::Key) -> BoxFuture<'static, FetchResult<Self::Value>> {
        (**self).fetch(key)
    }
}

struct Inner<D: FetchDriver> {
    driver: D,
    defaults: FetchOptions,
    store: CacheStore<D::Key, D::Value>,
    inflight: InflightRegistry<D::Key, D::Value>,
    subscriptions: SubscriptionRegistry<D::Key, D::Value>,
    /// The terminal error of the most recent settled operation per key,
    /// cleared by the next successful fetch or mutation.
    errors: Mutex<HashMap<D::Key, FetchError>>,
}

impl<D: FetchDriver> Inner<D> {
    fn record_success(&self, key: &D::Key, value: &D::Value) {
        self.store.set(key.clone(), value.clone());
        self.errors.lock().unwrap().remove(key);
    }

    fn record_failure(&self, key: &D::Key, err: &FetchError) {
        self.errors.lock().unwrap().insert(key.clone(), err.clone());
    }
}

/// An asynchronous resource cache with request deduplication, bounded retry,
/// and optimistic mutations.
///
/// The cache is an explicit instance handed to consumers, never a
/// process-wide singleton; independent caches coexist and can be tested in
/// isolation. Cloning is cheap and yields a handle to the same cache.
///
/// A consumer either [`fetch`](Self::fetch)es a key directly or
/// [`observe`](Self::observe)s it to receive [`ResourceEvent`]s. On a cache
/// miss (or a stale entry), concurrent requesters for the same key share a
/// single loader invocation; its settled result is written through the store
/// and fanned out to every subscriber of the key.
pub struct ResourceCache<D: FetchDriver> {
    inner: Arc<Inner<D>>,
}

impl<D: FetchDriver> Clone for ResourceCache<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: FetchDriver> std::fmt::Debug for ResourceCache<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("entries", &self.inner.store.entry_count())
            .field("inflight", &self.inner.inflight)
            .field("subscriptions", &self.inner.subscriptions)
            .finish()
    }
}

impl<D: FetchDriver> ResourceCache<D> {
    /// Creates a cache around `driver` with default [`FetchOptions`].
    pub fn new(driver: D) -> Self {
        Self::with_defaults(driver, FetchOptions::default())
    }

    /// Creates a cache around `driver` with the given default options.
    ///
    /// The defaults apply to [`fetch`](Self::fetch), [`observe`](Self::observe)
    /// and wake-triggered refetches; the `*_with` variants override them per
    /// call.
    pub fn with_defaults(driver: D, defaults: FetchOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                driver,
                defaults,
                store: CacheStore::new(),
                inflight: InflightRegistry::new(),
                subscriptions: SubscriptionRegistry::new(),
                errors: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The default options this cache was created with.
    pub fn defaults(&self) -> FetchOptions {
        self.inner.defaults
    }

    /// The cached value for `key`, if it is fresh under the default TTL.
    pub fn cached(&self, key: &D::Key) -> Option<D::Value> {
        self.inner.store.get(key, self.inner.defaults.ttl)
    }

    /// The cached value for `key` regardless of its age.
    pub fn peek(&self, key: &D::Key) -> Option<D::Value> {
        self.inner.store.peek(key)
    }

    /// Removes the cached value and error state for `key`.
    ///
    /// Does not touch an in-flight operation for the key.
    pub fn invalidate(&self, key: &D::Key) {
        self.inner.store.invalidate(key);
        self.inner.errors.lock().unwrap().remove(key);
    }

    /// Removes all cached values and error state.
    pub fn clear(&self) {
        self.inner.store.clear();
        self.inner.errors.lock().unwrap().clear();
    }

    /// The terminal error of the most recent settled operation for `key`,
    /// if it has not been superseded by a success since.
    pub fn last_error(&self, key: &D::Key) -> Option<FetchError> {
        self.inner.errors.lock().unwrap().get(key).cloned()
    }

    /// Whether an operation for `key` is currently in flight.
    pub fn is_pending(&self, key: &D::Key) -> bool {
        self.inner.inflight.is_pending(key)
    }

    /// Load-through read with the cache's default options.
    pub async fn fetch(&self, key: D::Key) -> FetchResult<D::Value> {
        self.fetch_with(key, self.inner.defaults).await
    }

    /// Load-through read: returns a fresh cached value, or joins/starts the
    /// operation for `key`.
    ///
    /// Consumers never observe intermediate retry attempts, only the settled
    /// result, which is identical for everyone who joined the operation.
    pub async fn fetch_with(&self, key: D::Key, options: FetchOptions) -> FetchResult<D::Value> {
        if let Some(value) = self.inner.store.get(&key, options.ttl) {
            return Ok(value);
        }
        self.refetch_with(key, options).await
    }

    /// Starts or joins an operation for `key` with the default options,
    /// bypassing the TTL check.
    pub fn refetch(&self, key: D::Key) -> SharedFetch<D::Value> {
        self.refetch_with(key, self.inner.defaults)
    }

    /// Starts or joins an operation for `key`, bypassing the TTL check.
    ///
    /// The operation is driven by the runtime and runs to completion even if
    /// the returned future is dropped. Subscribers of the key observe a
    /// `Loading` event when the operation starts and a single `Ready` or
    /// `Failed` event when it settles.
    pub fn refetch_with(&self, key: D::Key, options: FetchOptions) -> SharedFetch<D::Value> {
        let inner = Arc::clone(&self.inner);
        let fetch_key = key.clone();
        self.inner.inflight.load(key, move || async move {
            inner
                .subscriptions
                .notify(&fetch_key, &ResourceEvent::Loading);

            let result = retry(&options.retry, || inner.driver.fetch(&fetch_key)).await;

            match &result {
                Ok(value) => {
                    inner.record_success(&fetch_key, value);
                    inner
                        .subscriptions
                        .notify(&fetch_key, &ResourceEvent::Ready(value.clone()));
                }
                Err(err) => {
                    tracing::debug!(error = %err, "fetch settled with error");
                    inner.record_failure(&fetch_key, err);
                    inner
                        .subscriptions
                        .notify(&fetch_key, &ResourceEvent::Failed(err.clone()));
                }
            }
            result
        })
    }

    /// Observes `key` with the cache's default options.
    pub fn observe(
        &self,
        key: D::Key,
        callback: impl Fn(&ResourceEvent<D::Value>) + Send + Sync + 'static,
    ) -> Observation<D> {
        self.observe_with(key, self.inner.defaults, callback)
    }

    /// Observes `key`: registers `callback` for state changes and triggers
    /// an initial fetch when no fresh cached value exists.
    ///
    /// Dropping the returned [`Observation`] unsubscribes the callback.
    pub fn observe_with(
        &self,
        key: D::Key,
        options: FetchOptions,
        callback: impl Fn(&ResourceEvent<D::Value>) + Send + Sync + 'static,
    ) -> Observation<D> {
        let subscription = self
            .inner
            .subscriptions
            .subscribe(key.clone(), options, callback);

        if self.inner.store.get(&key, options.ttl).is_none() {
            // fire and forget; the operation is driven by the runtime
            let _ = self.refetch_with(key, options);
        }

        Observation {
            cache: self.clone(),
            options,
            subscription,
        }
    }

    /// Wake-signal entry point, e.g. "application regained focus".
    ///
    /// Refetches every actively observed key whose subscribers opted into
    /// wake refreshes, bypassing the TTL on purpose: this is refresh on
    /// demand, not expiry. Keys without subscribers are untouched, no matter
    /// how stale their cache entries are.
    pub fn on_wake(&self) {
        let targets = self.inner.subscriptions.wake_targets();
        tracing::debug!(keys = targets.len(), "wake signal, refetching observed keys");
        for (key, options) in targets {
            let _ = self.refetch_with(key, options);
        }
    }

    /// Applies an optimistic local change to `key`, confirms it via
    /// `remote_op`, and commits or rolls back.
    ///
    /// The optimistic value computed by `updater` is written to the cache
    /// and fanned out to subscribers *before* the remote operation runs.
    /// On success the cache is overwritten with the authoritative returned
    /// value; on failure the exact pre-mutation entry (timestamp included)
    /// is restored, subscribers receive a single `Failed` event, and the
    /// error is returned.
    ///
    /// Overlapping mutations on the same key are not serialized: each call
    /// snapshots whatever entry was current at its start, so a later
    /// mutation's rollback can clobber an earlier mutation's commit if they
    /// race. Callers that need stricter semantics must sequence their
    /// mutations per key.
    pub async fn mutate<U, R, F>(
        &self,
        key: D::Key,
        updater: U,
        remote_op: R,
    ) -> FetchResult<D::Value>
    where
        U: FnOnce(Option<&D::Value>) -> D::Value,
        R: FnOnce(D::Value) -> F,
        F: Future<Output = FetchResult<D::Value>>,
    {
        let inner = &self.inner;

        let snapshot = inner.store.snapshot(&key);
        let optimistic = updater(snapshot.as_ref().map(|entry| &entry.value));
        inner.store.set(key.clone(), optimistic.clone());
        inner
            .subscriptions
            .notify(&key, &ResourceEvent::Ready(optimistic.clone()));

        match remote_op(optimistic).await {
            Ok(value) => {
                inner.record_success(&key, &value);
                inner
                    .subscriptions
                    .notify(&key, &ResourceEvent::Ready(value.clone()));
                Ok(value)
            }
            Err(err) => {
                tracing::debug!(error = %err, "mutation failed, rolling back");
                inner.store.restore(&key, snapshot);
                inner.record_failure(&key, &err);
                inner
                    .subscriptions
                    .notify(&key, &ResourceEvent::Failed(err.clone()));
                Err(err)
            }
        }
    }
}

/// A live observation of one key.
///
/// Dropping the handle unsubscribes the callback. An in-flight operation for
/// the key keeps running to completion and its result stays cached; only the
/// notification stops.
pub struct Observation<D: FetchDriver> {
    cache: ResourceCache<D>,
    options: FetchOptions,
    subscription: Subscription<D::Key, D::Value>,
}

impl<D: FetchDriver> Observation<D> {
    /// The observed key.
    pub fn key(&self) -> &D::Key {
        self.subscription.key()
    }

    /// The current cached value under this observation's TTL.
    pub fn current(&self) -> Option<D::Value> {
        self.cache
            .inner
            .store
            .get(self.subscription.key(), self.options.ttl)
    }

    /// Whether an operation for the observed key is currently in flight.
    pub fn is_loading(&self) -> bool {
        self.cache.is_pending(self.subscription.key())
    }

    /// The terminal error of the most recent settled operation for the
    /// observed key, if any.
    pub fn current_error(&self) -> Option<FetchError> {
        self.cache.last_error(self.subscription.key())
    }

    /// Forces a reload of the observed key, bypassing the TTL.
    pub fn refetch(&self) -> SharedFetch<D::Value> {
        self.cache
            .refetch_with(self.subscription.key().clone(), self.options)
    }

    /// Removes this observer.
    pub fn unsubscribe(self) {
        self.subscription.unsubscribe();
    }
}
