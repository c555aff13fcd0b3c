//! Helpers for testing caches and their fetch strategies.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Tests relying on [`RecordingFetch::with_delay`] should run with a paused clock
//!    (`#[tokio::test(start_paused = true)]`), so the delay does not slow down the test suite
//!    and timing assertions stay deterministic.

use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `fog_cache` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("fog_cache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A small record used as cached data in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: u32,
    pub name: String,
}

/// The fixture user with the given `id`.
pub fn user(id: u32) -> User {
    User {
        id,
        name: format!("user {id}"),
    }
}

/// The future returned by fetchers created through [`RecordingFetch::fetch`].
pub type FetchFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A fake fetcher that records every physical call made through it.
///
/// The recorder is cheap to clone; all clones share the same record. `A` is whatever the
/// fetcher is called with, so a batched fetcher records one `Vec` of args per call.
#[derive(Debug)]
pub struct RecordingFetch<A> {
    calls: Arc<Mutex<Vec<A>>>,
    delay: Duration,
}

impl<A> Clone for RecordingFetch<A> {
    fn clone(&self) -> Self {
        Self {
            calls: Arc::clone(&self.calls),
            delay: self.delay,
        }
    }
}

impl<A> Default for RecordingFetch<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> RecordingFetch<A> {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
        }
    }

    /// Makes every fetch sleep for `delay` before it responds.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The number of calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// Takes the args of every call made since the last time this was called.
    pub fn take_calls(&self) -> Vec<A> {
        mem::take(&mut *self.calls.lock())
    }
}

impl<A: Clone + Send + 'static> RecordingFetch<A> {
    /// Creates a fetcher that records its args and answers with `respond`.
    pub fn fetch<T, F>(&self, respond: F) -> impl Fn(A) -> FetchFuture<T> + Send + Sync + 'static
    where
        T: Send + 'static,
        F: Fn(A) -> T + Send + Sync + 'static,
    {
        let calls = Arc::clone(&self.calls);
        let delay = self.delay;
        let respond = Arc::new(respond);

        move |args: A| {
            calls.lock().push(args.clone());
            let respond = Arc::clone(&respond);
            let future: FetchFuture<T> = Box::pin(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                respond(args)
            });
            future
        }
    }
}
