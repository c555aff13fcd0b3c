//! The keyed store of entries and its request deduplication.
//!
//! A [`Cache`] maps the canonical key of every argument value to one [`Entry`]. Callers never
//! fetch themselves; they ask the cache for an entry through [`Cache::get`], and the cache
//! decides whether a fetch is needed. Every fetch the cache decides on is published as a
//! [`NextRequest`] and handed to the [`Strategy`](crate::driver::Strategy) the cache was built
//! with, which eventually reports back through [`Cache::receive`].

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::driver::{RequestDriver, Responder, Strategy};
use crate::entry::{Entry, EntryHandle};
use crate::key::CacheKey;
use crate::merge::Merged;
use crate::staleness::Staleness;

/// A fetch trigger published by the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextRequest<A> {
    pub args: A,
    /// Strictly increasing per cache, starting at 1.
    pub request_id: u64,
}

/// The outcome of a fetch, reported back to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received<A, D, E> {
    Data { args: A, data: D },
    Error { args: A, error: E },
}

impl<A, D, E> Received<A, D, E> {
    pub fn from_result(args: A, result: Result<D, E>) -> Self {
        match result {
            Ok(data) => Self::Data { args, data },
            Err(error) => Self::Error { args, error },
        }
    }

    pub fn args(&self) -> &A {
        match self {
            Self::Data { args, .. } | Self::Error { args, .. } => args,
        }
    }
}

/// Cache-wide settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Staleness applied by [`Cache::get`] unless overridden per call.
    pub staleness: Staleness,
}

/// Per-call options of [`Cache::get_with`].
#[derive(Debug, Clone)]
pub struct GetOptions<Al> {
    /// Overrides the cache's default staleness.
    pub staleness: Option<Staleness>,
    /// Binds this alias to the requested key, whether or not a fetch happens.
    pub alias: Option<Al>,
}

impl<Al> Default for GetOptions<Al> {
    fn default() -> Self {
        Self {
            staleness: None,
            alias: None,
        }
    }
}

/// Per-call options of [`Cache::request_with`].
#[derive(Debug, Clone)]
pub struct RequestOptions<Al> {
    pub alias: Option<Al>,
}

impl<Al> Default for RequestOptions<Al> {
    fn default() -> Self {
        Self { alias: None }
    }
}

type Slot<D, E> = watch::Sender<Entry<D, E>>;

/// State shared between all handles of one cache and its responder.
pub(crate) struct Shared<A, D, E> {
    name: Arc<str>,
    options: CacheOptions,
    entries: Mutex<HashMap<CacheKey, Slot<D, E>>>,
    aliases: Mutex<HashMap<CacheKey, CacheKey>>,
    request_id: AtomicU64,
    requests: watch::Sender<Option<NextRequest<A>>>,
    driver: Option<Box<dyn RequestDriver<A>>>,
}

impl<A, D, E> Shared<A, D, E> {
    fn new(name: String, options: CacheOptions, driver: Option<Box<dyn RequestDriver<A>>>) -> Self {
        Self {
            name: name.into(),
            options,
            entries: Mutex::new(HashMap::new()),
            aliases: Mutex::new(HashMap::new()),
            request_id: AtomicU64::new(0),
            requests: watch::channel(None).0,
            driver,
        }
    }

    fn slot<'a>(entries: &'a mut HashMap<CacheKey, Slot<D, E>>, key: &CacheKey) -> &'a Slot<D, E> {
        entries
            .entry(key.clone())
            .or_insert_with(|| watch::channel(Entry::new()).0)
    }

    fn read(&self, key: &CacheKey) -> EntryHandle<D, E> {
        let mut entries = self.entries.lock();
        EntryHandle::new(Self::slot(&mut entries, key).subscribe())
    }

    /// Applies `modify` as one change, creating the entry if needed.
    fn modify(&self, key: &CacheKey, modify: impl FnOnce(&mut Entry<D, E>)) {
        let mut entries = self.entries.lock();
        Self::slot(&mut entries, key).send_modify(modify);
    }

    fn set_loading(&self, key: &CacheKey, loading: bool) {
        self.modify(key, |entry| entry.set_loading(loading));
    }

    fn set_data(&self, key: &CacheKey, data: Option<D>) {
        let Some(data) = data else {
            return self.remove(key);
        };

        tracing::debug!(cache = %self.name, %key, "Receiving data");
        metric!(counter("cache.receive") += 1, "cache" => &self.name, "outcome" => "data");
        self.modify(key, |entry| entry.set_data(data));
    }

    fn set_error(&self, key: &CacheKey, error: E) {
        tracing::debug!(cache = %self.name, %key, "Receiving error");
        metric!(counter("cache.receive") += 1, "cache" => &self.name, "outcome" => "error");
        self.modify(key, |entry| entry.set_error(error));
    }

    fn remove(&self, key: &CacheKey) {
        let removed = self.entries.lock().remove(key);
        if let Some(slot) = removed {
            tracing::debug!(cache = %self.name, %key, "Removing entry");
            // handles still holding the removed entry observe it as pristine
            slot.send_replace(Entry::new());
        }
    }

    fn resolve_alias(&self, alias: &CacheKey) -> Option<CacheKey> {
        self.aliases.lock().get(alias).cloned()
    }

    fn bind_alias(&self, alias: CacheKey, key: CacheKey) {
        tracing::trace!(cache = %self.name, %alias, %key, "Binding alias");
        self.aliases.lock().insert(alias, key);
    }
}

impl<A: Serialize, D, E> Shared<A, D, E> {
    pub(crate) fn receive(&self, received: Received<A, D, E>) {
        match received {
            Received::Data { args, data } => self.set_data(&CacheKey::from_args(&args), Some(data)),
            Received::Error { args, error } => self.set_error(&CacheKey::from_args(&args), error),
        }
    }
}

impl<A: Clone + 'static, D, E> Shared<A, D, E> {
    /// Publishes a trigger and hands it to the driver.
    fn trigger(&self, key: &CacheKey, args: &A) {
        let request_id = self.request_id.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(cache = %self.name, %key, request_id, "Requesting");
        metric!(counter("cache.request") += 1, "cache" => &self.name);

        let request = NextRequest {
            args: args.clone(),
            request_id,
        };
        self.requests.send_replace(Some(request.clone()));
        if let Some(driver) = &self.driver {
            driver.dispatch(request);
        }
    }
}

/// A cache of fetch states keyed by argument values.
///
/// `A` are the arguments identifying a piece of data, `D` the data, `E` the error a fetch can
/// fail with and `Al` the type of aliases. Data and errors are cloned out into every snapshot,
/// so wrap them in an [`Arc`] if they are expensive to clone.
///
/// A cache is a cheaply clonable handle. Building one with a strategy, and every call that may
/// trigger a fetch, must happen within a Tokio runtime.
pub struct Cache<A, D, E, Al = String> {
    shared: Arc<Shared<A, D, E>>,
    _alias: PhantomData<fn(&Al)>,
}

impl<A, D, E, Al> Clone for Cache<A, D, E, Al> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            _alias: PhantomData,
        }
    }
}

impl<A, D, E, Al> fmt::Debug for Cache<A, D, E, Al> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.shared.name)
            .field("options", &self.shared.options)
            .field("entries", &self.shared.entries.lock().len())
            .finish()
    }
}

impl<A, D, E, Al> Cache<A, D, E, Al> {
    pub fn builder(name: impl Into<String>) -> CacheBuilder<A, D, E, Al> {
        CacheBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The number of entries currently stored.
    pub fn len(&self) -> usize {
        self.shared.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<A, D, E, Al> Cache<A, D, E, Al>
where
    A: Serialize + Clone + Send + Sync + 'static,
    D: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    Al: Serialize,
{
    /// Returns the entry for `args`, triggering a fetch if it is needed.
    ///
    /// See [`Cache::get_with`].
    pub fn get(&self, args: &A) -> EntryHandle<D, E> {
        self.get_with(args, GetOptions::default())
    }

    /// Returns the entry for `args`, triggering a fetch if it is needed.
    ///
    /// A fetch is triggered if the entry does not exist yet, or if it is not loading and either
    /// holds no data or its data is stale. An entry that is loading is never requested again.
    /// Arguments that encode to the empty key (such as `None`) never trigger a fetch.
    ///
    /// Never blocks on the fetch itself.
    pub fn get_with(&self, args: &A, options: GetOptions<Al>) -> EntryHandle<D, E> {
        let key = CacheKey::from_args(args);
        if let Some(alias) = &options.alias {
            self.shared.bind_alias(CacheKey::from_args(alias), key.clone());
        }

        if key.is_empty() {
            return self.shared.read(&key);
        }

        let staleness = options.staleness.unwrap_or(self.shared.options.staleness);
        let (handle, should_request) = {
            let mut entries = self.shared.entries.lock();
            let should_request = match entries.get(&key) {
                None => true,
                Some(slot) => {
                    let entry = slot.borrow();
                    !entry.loading && (!entry.has_data || staleness.is_stale(entry.time))
                }
            };
            let slot = Shared::<A, D, E>::slot(&mut entries, &key);
            if should_request {
                slot.send_modify(|entry| entry.set_loading(true));
            }
            (EntryHandle::new(slot.subscribe()), should_request)
        };

        if should_request {
            self.shared.trigger(&key, args);
        } else {
            tracing::trace!(cache = %self.shared.name, %key, "Reusing entry");
            metric!(counter("cache.dedup") += 1, "cache" => &self.shared.name);
        }
        handle
    }

    /// Unconditionally triggers a fetch for `args` and returns its now loading entry.
    pub fn request(&self, args: &A) -> EntryHandle<D, E> {
        self.request_with(args, RequestOptions::default())
    }

    pub fn request_with(&self, args: &A, options: RequestOptions<Al>) -> EntryHandle<D, E> {
        let key = CacheKey::from_args(args);
        if let Some(alias) = &options.alias {
            self.shared.bind_alias(CacheKey::from_args(alias), key.clone());
        }

        if key.is_empty() {
            tracing::debug!(cache = %self.shared.name, "Ignoring request without args");
            return self.shared.read(&key);
        }

        self.shared.set_loading(&key, true);
        self.shared.trigger(&key, args);
        self.shared.read(&key)
    }

    /// Returns the entry for `args` without ever fetching.
    pub fn read(&self, args: &A) -> EntryHandle<D, E> {
        let key = CacheKey::from_args(args);
        tracing::trace!(cache = %self.shared.name, %key, "Reading");
        self.shared.read(&key)
    }

    /// Stores the outcome of a fetch.
    ///
    /// Outcomes nobody is waiting for anymore are stored all the same.
    pub fn receive(&self, received: Received<A, D, E>) {
        self.shared.receive(received);
    }

    pub fn set_loading(&self, args: &A, loading: bool) {
        self.shared.set_loading(&CacheKey::from_args(args), loading);
    }

    /// Stores `data`, clearing any error. `None` removes the entry instead.
    pub fn set_data(&self, args: &A, data: Option<D>) {
        self.shared.set_data(&CacheKey::from_args(args), data);
    }

    /// Stores `error`, keeping any previously received data.
    pub fn set_error(&self, args: &A, error: E) {
        self.shared.set_error(&CacheKey::from_args(args), error);
    }

    /// Removes the entry of `args`. The next access creates a pristine entry.
    pub fn remove(&self, args: &A) {
        self.shared.remove(&CacheKey::from_args(args));
    }

    /// Points `alias` at the entry of `args`, replacing any previous binding.
    pub fn set_alias(&self, args: &A, alias: &Al) {
        self.shared
            .bind_alias(CacheKey::from_args(alias), CacheKey::from_args(args));
    }

    /// Returns the entry `alias` points at.
    ///
    /// An unknown alias yields the pristine entry of "no active query".
    pub fn read_alias(&self, alias: &Al) -> EntryHandle<D, E> {
        let key = self
            .shared
            .resolve_alias(&CacheKey::from_args(alias))
            .unwrap_or_default();
        self.shared.read(&key)
    }

    /// Removes the entry `alias` points at. The alias itself stays bound.
    pub fn remove_by_alias(&self, alias: &Al) {
        if let Some(key) = self.shared.resolve_alias(&CacheKey::from_args(alias)) {
            self.shared.remove(&key);
        }
    }

    /// Calls [`get`](Self::get) for every args, in order.
    pub fn get_many(&self, args: &[A]) -> Vec<EntryHandle<D, E>> {
        args.iter().map(|args| self.get(args)).collect()
    }

    /// Gets every args and merges the entries under the default priority expression.
    pub fn get_merged(&self, args: &[A]) -> Merged<D, E, Vec<Option<D>>, Vec<Option<E>>> {
        Merged::list(self.get_many(args))
    }

    /// The most recently published fetch trigger.
    pub fn next_request(&self) -> Option<NextRequest<A>> {
        self.shared.requests.borrow().clone()
    }

    /// Subscribes to fetch triggers.
    ///
    /// This is a watch over the latest trigger: a slow subscriber only observes the most recent
    /// one. Strategies receive every trigger regardless.
    pub fn subscribe_requests(&self) -> watch::Receiver<Option<NextRequest<A>>> {
        self.shared.requests.subscribe()
    }
}

/// Builds a [`Cache`].
pub struct CacheBuilder<A, D, E, Al = String> {
    name: String,
    options: CacheOptions,
    _types: PhantomData<fn() -> (A, D, E, Al)>,
}

impl<A, D, E, Al> CacheBuilder<A, D, E, Al> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: CacheOptions::default(),
            _types: PhantomData,
        }
    }

    pub fn options(mut self, options: CacheOptions) -> Self {
        self.options = options;
        self
    }

    pub fn default_staleness(mut self, staleness: Staleness) -> Self {
        self.options.staleness = staleness;
        self
    }

    /// Builds a cache without a strategy.
    ///
    /// Triggers are only published through [`Cache::next_request`], outcomes have to be fed
    /// through [`Cache::receive`] by hand.
    pub fn build(self) -> Cache<A, D, E, Al> {
        tracing::debug!(cache = %self.name, "Creating cache");
        Cache {
            shared: Arc::new(Shared::new(self.name, self.options, None)),
            _alias: PhantomData,
        }
    }

    /// Builds a cache and binds `strategy` as its fetch strategy.
    pub fn build_with<S>(self, strategy: S) -> Cache<A, D, E, Al>
    where
        S: Strategy<A, D, E>,
    {
        tracing::debug!(cache = %self.name, "Creating cache");
        let shared = Arc::new_cyclic(|shared| {
            let driver = strategy.bind(Responder::new(shared.clone()));
            Shared::new(self.name, self.options, Some(Box::new(driver)))
        });
        Cache {
            shared,
            _alias: PhantomData,
        }
    }
}
