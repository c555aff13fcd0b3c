//! Combining several entries into one.
//!
//! The flags of a merged entry come from a [`PriorityExpr`] over its constituents, while data
//! and error are produced by caller supplied combinators over the raw constituent entries.

use std::fmt;
use std::sync::Arc;

use futures::future;
use tokio::time::Instant;

use crate::entry::{AwaitError, Entry, EntryHandle, EntryState};
use crate::priority::{PriorityExpr, Status};

/// Combines `entries` into one snapshot.
///
/// `time` is the most recent time of the constituents, or now if there are none.
pub fn combine<D, E, DM, EM>(
    entries: &[Entry<D, E>],
    expression: &PriorityExpr,
    merge_data: impl FnOnce(&[Entry<D, E>]) -> DM,
    merge_error: impl FnOnce(&[Entry<D, E>]) -> EM,
) -> Entry<DM, EM> {
    let status = expression.evaluate(entries);
    Entry {
        loading: status == Status::Loading,
        has_data: status == Status::Data,
        data: Some(merge_data(entries)),
        has_error: status == Status::Error,
        error: Some(merge_error(entries)),
        time: latest(entries),
    }
}

/// Merges `entries` into lists of their data and errors under the default expression.
pub fn merge<D: Clone, E: Clone>(
    entries: &[Entry<D, E>],
) -> Entry<Vec<Option<D>>, Vec<Option<E>>> {
    merge_with(entries, &PriorityExpr::default())
}

/// Merges `entries` into lists of their data and errors under `expression`.
pub fn merge_with<D: Clone, E: Clone>(
    entries: &[Entry<D, E>],
    expression: &PriorityExpr,
) -> Entry<Vec<Option<D>>, Vec<Option<E>>> {
    combine(entries, expression, collect_data, collect_errors)
}

fn collect_data<D: Clone, E>(entries: &[Entry<D, E>]) -> Vec<Option<D>> {
    entries.iter().map(|entry| entry.data.clone()).collect()
}

fn collect_errors<D, E: Clone>(entries: &[Entry<D, E>]) -> Vec<Option<E>> {
    entries.iter().map(|entry| entry.error.clone()).collect()
}

fn latest<D, E>(entries: &[Entry<D, E>]) -> Instant {
    entries
        .iter()
        .map(|entry| entry.time)
        .max()
        .unwrap_or_else(Instant::now)
}

type Combinator<D, E, T> = Arc<dyn Fn(&[Entry<D, E>]) -> T + Send + Sync>;

/// A live merge of several cache entries.
///
/// Nothing is cached: every accessor evaluates the current state of the constituents.
pub struct Merged<D, E, DM, EM> {
    handles: Vec<EntryHandle<D, E>>,
    expression: PriorityExpr,
    merge_data: Combinator<D, E, DM>,
    merge_error: Combinator<D, E, EM>,
}

impl<D, E, DM, EM> Clone for Merged<D, E, DM, EM> {
    fn clone(&self) -> Self {
        Self {
            handles: self.handles.clone(),
            expression: self.expression.clone(),
            merge_data: Arc::clone(&self.merge_data),
            merge_error: Arc::clone(&self.merge_error),
        }
    }
}

impl<D, E, DM, EM> fmt::Debug for Merged<D, E, DM, EM> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Merged")
            .field("entries", &self.handles.len())
            .field("expression", &self.expression)
            .finish()
    }
}

impl<D, E, DM, EM> Merged<D, E, DM, EM>
where
    D: Clone,
    E: Clone,
{
    pub fn new<MD, ME>(handles: Vec<EntryHandle<D, E>>, merge_data: MD, merge_error: ME) -> Self
    where
        MD: Fn(&[Entry<D, E>]) -> DM + Send + Sync + 'static,
        ME: Fn(&[Entry<D, E>]) -> EM + Send + Sync + 'static,
    {
        Self {
            handles,
            expression: PriorityExpr::default(),
            merge_data: Arc::new(merge_data),
            merge_error: Arc::new(merge_error),
        }
    }

    /// A merge standing for "nothing requested": never loading, without data or error.
    pub fn pristine<MD, ME>(merge_data: MD, merge_error: ME) -> Self
    where
        MD: Fn(&[Entry<D, E>]) -> DM + Send + Sync + 'static,
        ME: Fn(&[Entry<D, E>]) -> EM + Send + Sync + 'static,
    {
        Self::new(Vec::new(), merge_data, merge_error).with_expression(PriorityExpr::none())
    }

    pub fn with_expression(mut self, expression: PriorityExpr) -> Self {
        self.expression = expression;
        self
    }

    pub fn handles(&self) -> &[EntryHandle<D, E>] {
        &self.handles
    }

    pub fn status(&self) -> Status {
        self.expression.evaluate(&self.handles)
    }

    pub fn loading(&self) -> bool {
        self.status() == Status::Loading
    }

    pub fn has_data(&self) -> bool {
        self.status() == Status::Data
    }

    pub fn has_error(&self) -> bool {
        self.status() == Status::Error
    }

    pub fn data(&self) -> DM {
        (self.merge_data)(&self.entries())
    }

    pub fn error(&self) -> EM {
        (self.merge_error)(&self.entries())
    }

    pub fn time(&self) -> Instant {
        latest(&self.entries())
    }

    /// The merged state as one consistent snapshot.
    pub fn snapshot(&self) -> Entry<DM, EM> {
        combine(
            &self.entries(),
            &self.expression,
            |entries| (self.merge_data)(entries),
            |entries| (self.merge_error)(entries),
        )
    }

    fn entries(&self) -> Vec<Entry<D, E>> {
        self.handles.iter().map(EntryHandle::snapshot).collect()
    }

    /// Waits until any constituent changes.
    ///
    /// Returns `false` if there is nothing left to wait for.
    pub async fn changed(&mut self) -> bool {
        any_changed(&mut self.handles).await
    }

    /// Waits until the merge is not loading and returns that state.
    pub async fn settled(&self) -> Entry<DM, EM> {
        let mut handles = self.handles.clone();
        loop {
            let snapshot = self.snapshot();
            if !snapshot.loading || !any_changed(&mut handles).await {
                return snapshot;
            }
        }
    }

    /// Waits until the merge settles and returns its data.
    ///
    /// Fails with the merged error unless the settled merge has data.
    pub async fn data_settled(&self) -> Result<DM, AwaitError<EM>> {
        let snapshot = self.settled().await;
        match (snapshot.data, snapshot.error) {
            (Some(data), _) if snapshot.has_data => Ok(data),
            (_, Some(error)) if snapshot.has_error => Err(AwaitError::Failed(error)),
            _ => Err(AwaitError::NoData),
        }
    }
}

impl<D, E> Merged<D, E, Vec<Option<D>>, Vec<Option<E>>>
where
    D: Clone + 'static,
    E: Clone + 'static,
{
    /// A merge collecting the data and errors of `handles` into lists.
    pub fn list(handles: Vec<EntryHandle<D, E>>) -> Self {
        Self::new(handles, collect_data, collect_errors)
    }
}

impl<D, E, DM, EM> EntryState for Merged<D, E, DM, EM> {
    fn is_loading(&self) -> bool {
        self.expression.evaluate(&self.handles) == Status::Loading
    }

    fn has_data(&self) -> bool {
        self.expression.evaluate(&self.handles) == Status::Data
    }

    fn has_error(&self) -> bool {
        self.expression.evaluate(&self.handles) == Status::Error
    }
}

/// Waits until any open handle changes.
///
/// Handles whose entry was removed from its cache drop out of the wait. Returns `false` only
/// once every handle is closed.
async fn any_changed<D, E>(handles: &mut [EntryHandle<D, E>]) -> bool {
    let mut open: Vec<_> = handles.iter_mut().collect();
    while !open.is_empty() {
        let changes = open.iter_mut().map(|handle| Box::pin(handle.changed()));
        let (changed, index, _) = future::select_all(changes).await;
        if changed {
            return true;
        }
        open.swap_remove(index);
    }
    false
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::Cache;

    use super::*;

    type TestEntry = Entry<u32, String>;

    fn empty() -> TestEntry {
        Entry::new()
    }

    fn loading() -> TestEntry {
        let mut entry = Entry::new();
        entry.loading = true;
        entry
    }

    fn error() -> TestEntry {
        let mut entry = Entry::new();
        entry.has_error = true;
        entry.error = Some("error!".into());
        entry
    }

    fn data() -> TestEntry {
        let mut entry = Entry::new();
        entry.has_data = true;
        entry.data = Some(123);
        entry
    }

    fn flags<DM, EM>(entry: &Entry<DM, EM>) -> (bool, bool, bool) {
        (entry.loading, entry.has_data, entry.has_error)
    }

    #[test]
    fn test_passes_through_data_and_errors() {
        let merged = merge(&[empty(), error(), data(), loading()]);
        assert_eq!(merged.data, Some(vec![None, None, Some(123), None]));
        assert_eq!(
            merged.error,
            Some(vec![None, Some("error!".to_owned()), None, None])
        );
    }

    #[test]
    fn test_default_priorities() {
        // loading wins over errors
        assert_eq!(flags(&merge(&[error(), loading(), data(), empty()])), (true, false, false));
        // errors win when nothing is loading
        assert_eq!(flags(&merge(&[error(), data(), empty()])), (false, false, true));
        // data only once everything has data
        assert_eq!(flags(&merge(&[data(), data()])), (false, true, false));
        assert_eq!(flags(&merge(&[data(), data(), loading()])), (true, false, false));
        assert_eq!(flags(&merge(&[data(), data(), empty()])), (false, false, false));
        // nothing to wait for
        assert_eq!(flags(&merge::<u32, String>(&[])), (false, true, false));
    }

    #[test]
    fn test_custom_priorities() {
        let dl = PriorityExpr::parse("dl").unwrap();
        assert_eq!(
            flags(&merge_with(&[error(), loading(), data(), empty()], &dl)),
            (false, true, false)
        );
        assert_eq!(flags(&merge_with(&[error(), loading(), empty()], &dl)), (true, false, false));
        assert_eq!(flags(&merge_with(&[error(), empty()], &dl)), (false, false, false));

        let dlf = PriorityExpr::parse("dlf").unwrap();
        assert_eq!(
            flags(&merge_with(&[error(), loading(), data(), empty()], &dlf)),
            (false, true, false)
        );
        assert_eq!(flags(&merge_with(&[error(), loading(), empty()], &dlf)), (true, false, false));
        assert_eq!(flags(&merge_with(&[error(), empty()], &dlf)), (false, true, false));
    }

    #[test]
    fn test_custom_combinators() {
        let merged = combine(
            &[data(), data(), error()],
            &PriorityExpr::parse("D").unwrap(),
            |entries| entries.iter().filter_map(|entry| entry.data).sum::<u32>(),
            |entries| entries.iter().filter(|entry| entry.has_error).count(),
        );
        assert_eq!(merged.data, Some(246));
        assert_eq!(merged.error, Some(1));
        assert!(!merged.has_data);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_is_latest() {
        let older = data();
        tokio::time::advance(Duration::from_secs(5)).await;
        let newer = data();

        assert_eq!(merge(&[newer.clone(), older]).time, newer.time);

        let before = Instant::now();
        assert!(merge::<u32, String>(&[]).time >= before);
    }

    #[test]
    fn test_pristine() {
        let merged = Merged::<u32, String, Vec<Option<u32>>, Vec<Option<String>>>::pristine(
            |_| Vec::new(),
            |_| Vec::new(),
        );
        assert_eq!(merged.status(), Status::None);
        assert!(!merged.loading() && !merged.has_data() && !merged.has_error());
    }

    #[tokio::test]
    async fn test_live_merge() {
        let cache = Cache::<u32, String, String>::builder("merge").build();
        let merged = cache.get_merged(&[1, 2]);
        assert!(merged.loading());

        cache.set_data(&1, Some("one".into()));
        assert!(merged.loading());
        assert_eq!(merged.data(), [Some("one".to_owned()), None]);

        let waiter = tokio::spawn({
            let merged = merged.clone();
            async move { merged.data_settled().await }
        });
        tokio::task::yield_now().await;
        cache.set_data(&2, Some("two".into()));

        assert_eq!(
            waiter.await.unwrap(),
            Ok(vec![Some("one".to_owned()), Some("two".to_owned())])
        );
        assert!(merged.has_data());
    }

    #[tokio::test]
    async fn test_live_merge_error() {
        let cache = Cache::<u32, String, String>::builder("merge").build();
        let mut merged = cache.get_merged(&[1, 2]);

        cache.set_error(&1, "bad".into());
        assert!(merged.changed().await);
        // still waiting for the second entry
        assert!(merged.loading());

        cache.set_data(&2, Some("two".into()));
        let settled = merged.settled().await;
        assert!(settled.has_error);
        assert_eq!(
            merged.data_settled().await,
            Err(AwaitError::Failed(vec![Some("bad".to_owned()), None]))
        );
    }

    #[tokio::test]
    async fn test_settled_outlives_removed_constituent() {
        let cache = Cache::<u32, String, String>::builder("merge").build();
        let merged = cache
            .get_merged(&[1, 2])
            .with_expression(PriorityExpr::parse("ld").unwrap());

        cache.remove(&1);
        assert!(merged.loading());

        let waiter = tokio::spawn({
            let merged = merged.clone();
            async move { merged.settled().await }
        });
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        cache.set_data(&2, Some("two".into()));
        let settled = waiter.await.unwrap();
        assert!(!settled.loading && settled.has_data);
        assert_eq!(settled.data, Some(vec![None, Some("two".to_owned())]));

        // once the pending changes are drained there is nothing left to wait for
        let mut merged = merged;
        cache.remove(&2);
        while merged.changed().await {}
        assert!(!merged.changed().await);
    }
}
