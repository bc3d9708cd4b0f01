//! Helpers for testing the resource cache.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all
//!    console output is captured by the test runner.
//!
//!  - Timing-sensitive tests should run under
//!    `#[tokio::test(start_paused = true)]`; both the cache and the
//!    [`ScriptedDriver`] use `tokio::time`, so paused clocks are fully
//!    deterministic.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

use refetch::{FetchDriver, FetchResult, ResourceEvent};

/// Setup the test environment.
///
///  - Initializes logs: the logger only captures logs from the `refetch`
///    crate and mutes everything else.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("refetch=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A fetch driver that plays back scripted outcomes.
///
/// Outcomes are queued per key with [`script`](Self::script); every loader
/// invocation pops the next one. When a key's script is empty, the fetch
/// succeeds with `"<key>#<n>"` where `n` counts the invocations for that
/// key, so successive operations yield distinguishable values.
///
/// The driver is used through an [`Arc`], so tests keep a handle for
/// scripting and call-count assertions while the cache owns its clone.
#[derive(Default)]
pub struct ScriptedDriver {
    scripts: Mutex<HashMap<String, VecDeque<FetchResult<String>>>>,
    calls: AtomicUsize,
    calls_per_key: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
}

impl ScriptedDriver {
    /// Creates a driver whose fetches settle immediately.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a driver whose fetches settle after `delay`.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    /// Queues `outcomes` for `key`, after anything already queued.
    pub fn script(&self, key: &str, outcomes: impl IntoIterator<Item = FetchResult<String>>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(key.to_owned())
            .or_default()
            .extend(outcomes);
    }

    /// Total number of loader invocations across all keys.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// Number of loader invocations for `key`.
    pub fn calls_for(&self, key: &str) -> usize {
        self.calls_per_key
            .lock()
            .unwrap()
            .get(key)
            .copied()
            .unwrap_or_default()
    }
}

impl FetchDriver for ScriptedDriver {
    type Key = String;
    type Value = String;

    fn fetch(&self, key: &String) -> BoxFuture<'static, FetchResult<String>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let call = {
            let mut per_key = self.calls_per_key.lock().unwrap();
            let counter = per_key.entry(key.clone()).or_insert(0);
            *counter += 1;
            *counter
        };

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(key)
            .and_then(VecDeque::pop_front);
        let outcome = match scripted {
            Some(outcome) => outcome,
            None => Ok(format!("{key}#{call}")),
        };

        let delay = self.delay;
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            outcome
        }
        .boxed()
    }
}

/// Records every event delivered to subscribers, together with a tag naming
/// the subscriber that received it.
///
/// Clones share the same log, so one `EventLog` can collect the fan-out to
/// multiple subscribers and assert on the combined ordering.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<(String, ResourceEvent<String>)>>>,
}

impl EventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// A subscriber callback recording into this log with an empty tag.
    pub fn callback(&self) -> impl Fn(&ResourceEvent<String>) + Send + Sync + 'static {
        self.tagged("")
    }

    /// A subscriber callback recording into this log under `tag`.
    pub fn tagged(&self, tag: &str) -> impl Fn(&ResourceEvent<String>) + Send + Sync + 'static {
        let events = Arc::clone(&self.events);
        let tag = tag.to_owned();
        move |event| events.lock().unwrap().push((tag.clone(), event.clone()))
    }

    /// The recorded events, in delivery order, without tags.
    pub fn events(&self) -> Vec<ResourceEvent<String>> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// The recorded events, in delivery order, with their tags.
    pub fn tagged_events(&self) -> Vec<(String, ResourceEvent<String>)> {
        self.events.lock().unwrap().clone()
    }

    /// Discards everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}
