//! Grouping of fetch triggers into batch fetches.
//!
//! Every trigger appends its args to a buffer. The first args of a buffer arm a timer of
//! [`BatchOptions::buffer_time`], and the buffer is flushed when that timer fires or as soon as
//! it holds [`BatchOptions::max_batch_size`] args, whichever happens first. A flush hands all
//! buffered args to one grouped fetch and reports exactly one outcome per args, in the order
//! the args were buffered.
//!
//! Flushes run independently of each other: a new buffer may fill up and flush while earlier
//! flushes are still in flight.

use std::future::Future;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cache::{NextRequest, Received};
use crate::driver::{RequestDriver, Responder, Strategy};
use crate::key::CacheKey;

/// Batching parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    /// How long the first args of a batch wait for company.
    #[serde(with = "humantime_serde")]
    pub buffer_time: Duration,
    /// Flush as soon as this many args are buffered.
    pub max_batch_size: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            buffer_time: Duration::from_millis(10),
            max_batch_size: 25,
        }
    }
}

/// Matches the results of a grouped fetch back to the args they were fetched for.
///
/// `key_of` derives the canonical key of the args a result belongs to. Every args receives the
/// result with its key, or the error built by `missing_error` if the fetch returned none.
/// Outcomes are in the order of `args_array`. If several results share a key, the last wins.
pub fn reconcile<A, D, E>(
    args_array: Vec<A>,
    results: Vec<D>,
    key_of: impl Fn(&D) -> CacheKey,
    missing_error: impl Fn(&A) -> E,
) -> Vec<Received<A, D, E>>
where
    A: Serialize,
    D: Clone,
{
    let results: std::collections::HashMap<_, _> = results
        .into_iter()
        .map(|data| (key_of(&data), data))
        .collect();

    args_array
        .into_iter()
        .map(|args| match results.get(&CacheKey::from_args(&args)) {
            Some(data) => Received::Data {
                args,
                data: data.clone(),
            },
            None => {
                let error = missing_error(&args);
                Received::Error { args, error }
            }
        })
        .collect()
}

type KeyFn<D> = Box<dyn Fn(&D) -> CacheKey + Send + Sync>;
type MissingErrorFn<A, E> = Box<dyn Fn(&A) -> E + Send + Sync>;
type RequestErrorFn<A, E, FE> = Box<dyn Fn(FE, &[A]) -> E + Send + Sync>;

/// A strategy fetching args in batches through `fetch_many`.
///
/// `fetch_many` receives the buffered args and may return its results in any order and omit
/// some. Failing the whole fetch fails every args of the batch; per-item failures have to be
/// expressed as missing results.
///
/// The results are the cached data itself. A backend that answers in a different shape, for
/// example rows wrapped in an envelope, is unwrapped into `D` inside `fetch_many`, before the
/// results are matched to their args.
pub struct Batched<A, D, E, FE, F> {
    fetch_many: F,
    options: BatchOptions,
    key_fn: KeyFn<D>,
    missing_error: MissingErrorFn<A, E>,
    request_error: RequestErrorFn<A, E, FE>,
}

impl<A, D, E, FE, F> Batched<A, D, E, FE, F> {
    /// Creates the strategy with default [`BatchOptions`].
    ///
    /// - `fetch_many` resolves to the data for the args it was given, already mapped into `D`.
    /// - `key_fn` returns the args a result answers, compared by canonical key.
    /// - `missing_error` builds the error for args the fetch returned no result for.
    /// - `request_error` builds the error every args of a failed batch receives.
    pub fn new<K, KF, ME, RE>(
        fetch_many: F,
        key_fn: KF,
        missing_error: ME,
        request_error: RE,
    ) -> Self
    where
        K: Serialize,
        KF: Fn(&D) -> K + Send + Sync + 'static,
        ME: Fn(&A) -> E + Send + Sync + 'static,
        RE: Fn(FE, &[A]) -> E + Send + Sync + 'static,
    {
        Self {
            fetch_many,
            options: BatchOptions::default(),
            key_fn: Box::new(move |data: &D| CacheKey::from_args(&key_fn(data))),
            missing_error: Box::new(missing_error),
            request_error: Box::new(request_error),
        }
    }

    pub fn with_options(mut self, options: BatchOptions) -> Self {
        self.options = options;
        self
    }
}

impl<A, D, E, FE, F, Fut> Strategy<A, D, E> for Batched<A, D, E, FE, F>
where
    A: Serialize + Clone + Send + Sync + 'static,
    D: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    FE: Send + 'static,
    F: Fn(Vec<A>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<D>, FE>> + Send + 'static,
{
    type Driver = BatchDriver<A, D, E, FE, F>;

    fn bind(self, responder: Responder<A, D, E>) -> Self::Driver {
        let window = BatchWindow {
            fetch_many: self.fetch_many,
            options: self.options,
            key_fn: self.key_fn,
            missing_error: self.missing_error,
            request_error: self.request_error,
            responder,
            state: Mutex::new(BatchState {
                buffer: Vec::new(),
                generation: 0,
                timer: None,
            }),
        };
        BatchDriver {
            window: Arc::new(window),
        }
    }
}

pub struct BatchDriver<A, D, E, FE, F> {
    window: Arc<BatchWindow<A, D, E, FE, F>>,
}

impl<A, D, E, FE, F, Fut> RequestDriver<A> for BatchDriver<A, D, E, FE, F>
where
    A: Serialize + Clone + Send + Sync + 'static,
    D: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    FE: Send + 'static,
    F: Fn(Vec<A>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<D>, FE>> + Send + 'static,
{
    fn dispatch(&self, request: NextRequest<A>) {
        self.window.push(request.args);
    }
}

struct BatchState<A> {
    buffer: Vec<A>,
    /// Bumped on every flush, so a timer armed for an earlier buffer never flushes a later one.
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl<A> BatchState<A> {
    fn take(&mut self) -> Vec<A> {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation += 1;
        mem::take(&mut self.buffer)
    }
}

struct BatchWindow<A, D, E, FE, F> {
    fetch_many: F,
    options: BatchOptions,
    key_fn: KeyFn<D>,
    missing_error: MissingErrorFn<A, E>,
    request_error: RequestErrorFn<A, E, FE>,
    responder: Responder<A, D, E>,
    state: Mutex<BatchState<A>>,
}

impl<A, D, E, FE, F, Fut> BatchWindow<A, D, E, FE, F>
where
    A: Serialize + Clone + Send + Sync + 'static,
    D: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    FE: Send + 'static,
    F: Fn(Vec<A>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<D>, FE>> + Send + 'static,
{
    fn push(self: &Arc<Self>, args: A) {
        let batch = {
            let mut state = self.state.lock();
            if state.buffer.is_empty() {
                let generation = state.generation;
                let buffer_time = self.options.buffer_time;
                let window = Arc::clone(self);
                state.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(buffer_time).await;
                    window.expire(generation);
                }));
            }

            state.buffer.push(args);
            if state.buffer.len() >= self.options.max_batch_size.max(1) {
                Some(state.take())
            } else {
                None
            }
        };

        if let Some(batch) = batch {
            self.flush(batch);
        }
    }

    /// Flushes the buffer the timer of `generation` was armed for, if it is still pending.
    fn expire(self: &Arc<Self>, generation: u64) {
        let batch = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            // this is the timer task itself
            state.timer = None;
            state.take()
        };

        if !batch.is_empty() {
            self.flush(batch);
        }
    }

    fn flush(self: &Arc<Self>, args_array: Vec<A>) {
        tracing::debug!(size = args_array.len(), "Flushing request batch");
        metric!(counter("cache.batch.flush") += 1);
        metric!(histogram("cache.batch.size") = args_array.len() as u64);

        let future = (self.fetch_many)(args_array.clone());
        let window = Arc::clone(self);
        tokio::spawn(async move {
            let start = Instant::now();
            let result = future.await;
            metric!(timer("cache.batch.duration") = start.elapsed());

            let outcomes = match result {
                Ok(results) => reconcile(
                    args_array,
                    results,
                    &window.key_fn,
                    &window.missing_error,
                ),
                Err(error) => {
                    tracing::debug!(size = args_array.len(), "Request batch failed");
                    let error = (window.request_error)(error, &args_array);
                    args_array
                        .into_iter()
                        .map(|args| Received::Error {
                            args,
                            error: error.clone(),
                        })
                        .collect()
                }
            };

            for received in outcomes {
                window.responder.receive(received);
            }
        });
    }
}
