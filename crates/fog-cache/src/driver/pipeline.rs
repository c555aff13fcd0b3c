//! Triggers as a stream.
//!
//! [`Pipeline`] feeds every trigger into a stream and lets the caller assemble whatever
//! transformation it needs, ending in a stream of [`Received`] outcomes that is drained into the
//! cache. [`each`] is the ready-made stage running one fetch per trigger with bounded
//! concurrency.

use std::future::Future;

use futures::channel::mpsc;
use futures::future;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::Serialize;

use crate::cache::{NextRequest, Received};

use super::{RequestDriver, Responder, Strategy};

/// The stream of triggers handed to the stages of a [`Pipeline`].
pub type Requests<A> = BoxStream<'static, NextRequest<A>>;

/// Hands the trigger stream to `stages` and drains the resulting outcomes into the cache.
pub struct Pipeline<F> {
    stages: F,
}

impl<F> Pipeline<F> {
    pub fn new(stages: F) -> Self {
        Self { stages }
    }
}

impl<A, D, E, F, S> Strategy<A, D, E> for Pipeline<F>
where
    A: Serialize + Send + Sync + 'static,
    D: Send + Sync + 'static,
    E: Send + Sync + 'static,
    F: FnOnce(Requests<A>) -> S,
    S: Stream<Item = Received<A, D, E>> + Send + 'static,
{
    type Driver = PipelineDriver<A>;

    fn bind(self, responder: Responder<A, D, E>) -> Self::Driver {
        let (sender, receiver) = mpsc::unbounded();
        let outcomes = (self.stages)(receiver.boxed());

        tokio::spawn(async move {
            outcomes
                .for_each(|received| {
                    responder.receive(received);
                    future::ready(())
                })
                .await;
            tracing::debug!("Request pipeline finished");
        });

        PipelineDriver { sender }
    }
}

pub struct PipelineDriver<A> {
    sender: mpsc::UnboundedSender<NextRequest<A>>,
}

impl<A: Send + 'static> RequestDriver<A> for PipelineDriver<A> {
    fn dispatch(&self, request: NextRequest<A>) {
        if let Err(error) = self.sender.unbounded_send(request) {
            let request_id = error.into_inner().request_id;
            tracing::error!(request_id, "Request pipeline is closed, dropping trigger");
        }
    }
}

/// A stage running `fetch` for every trigger, at most `concurrency` at a time.
///
/// Outcomes are emitted in completion order. A failed fetch becomes an error outcome for its
/// args and does not affect any other trigger.
pub fn each<A, D, E, F, Fut>(
    concurrency: usize,
    fetch: F,
) -> impl FnOnce(Requests<A>) -> BoxStream<'static, Received<A, D, E>>
where
    A: Clone + Send + 'static,
    D: Send + 'static,
    E: Send + 'static,
    F: Fn(A) -> Fut + Send + 'static,
    Fut: Future<Output = Result<D, E>> + Send + 'static,
{
    move |requests| {
        requests
            .map(move |request| {
                let args = request.args;
                let future = fetch(args.clone());
                async move { Received::from_result(args, future.await) }
            })
            .buffer_unordered(concurrency.max(1))
            .boxed()
    }
}
