//! The per-key record of a cache and its observable handle.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// A snapshot of the fetch state stored for one key.
///
/// `has_data` and `has_error` are independent of each other: a failed refetch keeps the
/// previous data around next to the new error, and `loading` can be set on top of either.
#[derive(Debug, Clone)]
pub struct Entry<D, E> {
    /// A fetch for this key is in flight.
    pub loading: bool,
    pub has_data: bool,
    /// The last data received, `None` until data arrived at least once.
    pub data: Option<D>,
    pub has_error: bool,
    pub error: Option<E>,
    /// When data or an error was last received, or when the entry was created.
    pub time: Instant,
}

impl<D, E> Entry<D, E> {
    /// A pristine entry: not loading, no data and no error.
    pub fn new() -> Self {
        Self {
            loading: false,
            has_data: false,
            data: None,
            has_error: false,
            error: None,
            time: Instant::now(),
        }
    }

    /// Time elapsed since [`Entry::time`].
    pub fn age(&self) -> Duration {
        self.time.elapsed()
    }

    /// Only touches the loading flag, `time` is left alone.
    pub(crate) fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
    }

    pub(crate) fn set_data(&mut self, data: D) {
        self.loading = false;
        self.has_data = true;
        self.data = Some(data);
        self.has_error = false;
        self.error = None;
        self.time = Instant::now();
    }

    /// Stores `error` while keeping any previous data.
    pub(crate) fn set_error(&mut self, error: E) {
        self.loading = false;
        self.has_error = true;
        self.error = Some(error);
        self.time = Instant::now();
    }
}

impl<D, E> Default for Entry<D, E> {
    fn default() -> Self {
        Self::new()
    }
}

/// The three flags every readiness check is built on.
///
/// Implemented by snapshots, live handles and references to either, so heterogeneous sets of
/// entries can be classified together.
pub trait EntryState {
    fn is_loading(&self) -> bool;
    fn has_data(&self) -> bool;
    fn has_error(&self) -> bool;
}

impl<D, E> EntryState for Entry<D, E> {
    fn is_loading(&self) -> bool {
        self.loading
    }

    fn has_data(&self) -> bool {
        self.has_data
    }

    fn has_error(&self) -> bool {
        self.has_error
    }
}

impl<T: EntryState + ?Sized> EntryState for &T {
    fn is_loading(&self) -> bool {
        (**self).is_loading()
    }

    fn has_data(&self) -> bool {
        (**self).has_data()
    }

    fn has_error(&self) -> bool {
        (**self).has_error()
    }
}

/// Error returned when awaiting the data of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AwaitError<E> {
    /// The entry settled with an error.
    #[error("request failed: {0}")]
    Failed(E),
    /// The entry settled without data or error, e.g. because it was removed.
    #[error("entry settled without data")]
    NoData,
}

/// A read-only, subscribable view of one cache entry.
///
/// The handle always reflects the latest state of the entry. If the entry is removed from its
/// cache, the handle observes a final pristine state and stops receiving updates.
#[derive(Debug)]
pub struct EntryHandle<D, E> {
    receiver: watch::Receiver<Entry<D, E>>,
}

impl<D, E> Clone for EntryHandle<D, E> {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
        }
    }
}

impl<D, E> EntryHandle<D, E> {
    pub(crate) fn new(receiver: watch::Receiver<Entry<D, E>>) -> Self {
        Self { receiver }
    }

    /// Borrows the current state.
    ///
    /// The returned guard holds a read lock on the entry, so it must not be held across an
    /// `.await` or while mutating the cache.
    pub fn borrow(&self) -> watch::Ref<'_, Entry<D, E>> {
        self.receiver.borrow()
    }

    /// Returns a receiver that is notified on every subsequent change of the entry.
    pub fn subscribe(&self) -> watch::Receiver<Entry<D, E>> {
        let mut receiver = self.receiver.clone();
        receiver.mark_unchanged();
        receiver
    }

    /// Waits for the next change of the entry.
    ///
    /// Returns `false` once the entry was removed from its cache and no further changes will
    /// arrive.
    pub async fn changed(&mut self) -> bool {
        self.receiver.changed().await.is_ok()
    }
}

impl<D: Clone, E: Clone> EntryHandle<D, E> {
    /// Clones the current state.
    pub fn snapshot(&self) -> Entry<D, E> {
        self.receiver.borrow().clone()
    }

    /// The current data, together with the full snapshot it was taken from.
    pub fn parts(&self) -> (Option<D>, Entry<D, E>) {
        let entry = self.snapshot();
        (entry.data.clone(), entry)
    }

    /// Waits until the entry is not loading and returns that state.
    ///
    /// Resolves immediately if nothing is in flight.
    pub async fn settled(&self) -> Entry<D, E> {
        let mut receiver = self.receiver.clone();
        if let Ok(entry) = receiver.wait_for(|entry| !entry.loading).await {
            return entry.clone();
        }
        // the entry was dropped while loading
        receiver.borrow().clone()
    }

    /// Waits until the entry settles and returns its data.
    ///
    /// Fails with the entry's error if the settled entry holds no data.
    pub async fn data(&self) -> Result<D, AwaitError<E>> {
        let entry = self.settled().await;
        match (entry.data, entry.error) {
            (Some(data), _) if entry.has_data => Ok(data),
            (_, Some(error)) => Err(AwaitError::Failed(error)),
            _ => Err(AwaitError::NoData),
        }
    }
}

impl<D, E> EntryState for EntryHandle<D, E> {
    fn is_loading(&self) -> bool {
        self.receiver.borrow().loading
    }

    fn has_data(&self) -> bool {
        self.receiver.borrow().has_data
    }

    fn has_error(&self) -> bool {
        self.receiver.borrow().has_error
    }
}
