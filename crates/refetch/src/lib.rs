//! # An asynchronous resource cache with deduplication, retry, and optimistic mutation
//!
//! This crate is an in-memory coordination layer between consumers that want
//! the value for a key and a caller-supplied loader that can produce it. It
//! defines no on-disk or wire format.
//!
//! ## Layers
//!
//! The cache is built from small, independently testable registries, all
//! indexed by key:
//!
//! - [`CacheStore`] holds the most recent successful value per key with a
//!   time-to-live. Expiration is lazy: a stale entry reads as absent.
//! - [`InflightRegistry`] does request coalescing: at most one operation is
//!   in flight per key, and every consumer that asks while it is pending
//!   joins it and receives the identical settled result.
//! - [`retry`] wraps a single operation in bounded retry with exponential
//!   backoff. Only transient failures are retried; consumers never observe
//!   intermediate attempts.
//! - [`SubscriptionRegistry`] tracks interested consumers per key and fans
//!   [`ResourceEvent`]s out to them synchronously, in registration order.
//! - [`ResourceCache`] composes the registries behind the consumer-facing
//!   API: load-through [`fetch`](ResourceCache::fetch), live
//!   [`observe`](ResourceCache::observe), wake-triggered refresh via
//!   [`on_wake`](ResourceCache::on_wake), and rollback-safe optimistic
//!   [`mutate`](ResourceCache::mutate).
//!
//! A request goes through the following steps: the store is consulted first;
//! on a miss or a stale entry, the in-flight registry either joins the
//! pending operation for the key or starts a new one through the retry
//! controller. On success the store is updated *before* joiners and
//! subscribers see the result; on terminal failure everyone receives the
//! same single error.
//!
//! The loader is supplied via the [`FetchDriver`] trait. Failure
//! classification is the [`FetchError`] variant the driver constructs;
//! conversions from foreign errors default to transient.
//!
//! ## Concurrency model
//!
//! All registries guard their state with per-registry mutexes and are safe
//! under a multi-threaded runtime, though the design assumes cooperative
//! scheduling: suspension points are the loader await, backoff sleeps, and
//! attempt timeouts. Same-key notifications are ordered, cross-key
//! notifications are not. Dropping consumers never cancels in-flight work.
//!
//! Time-dependent behavior is based on [`tokio::time`], so tests can run
//! under `tokio::time::pause` with deterministic clocks.

#![warn(missing_docs)]

mod config;
mod error;
mod inflight;
mod resource;
mod retry;
mod store;
mod subscription;

pub use config::{FetchOptions, RetryPolicy};
pub use error::{FetchError, FetchResult};
pub use inflight::{InflightRegistry, SharedFetch};
pub use resource::{FetchDriver, Observation, ResourceCache};
pub use retry::retry;
pub use store::{CacheStore, StoredEntry};
pub use subscription::{ResourceEvent, Subscription, SubscriptionRegistry};
