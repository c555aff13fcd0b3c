//! Fetch strategies.
//!
//! A cache never fetches by itself. It is built with a [`Strategy`], which is bound exactly once
//! to a [`Responder`] and turned into a [`RequestDriver`]. The cache hands every trigger to that
//! driver, and the driver eventually reports the outcome through the responder.
//!
//! - [`Direct`] runs one fetch per trigger.
//! - [`Pipeline`] exposes the triggers as a stream for arbitrary transformation.
//! - [`Batched`](crate::batch::Batched) groups triggers into batch fetches.

use std::sync::Weak;

use serde::Serialize;

use crate::cache::{NextRequest, Received, Shared};

mod direct;
pub mod pipeline;

pub use direct::Direct;
pub use pipeline::Pipeline;

/// Receives every trigger of a cache.
///
/// `dispatch` is called synchronously from within [`Cache::get`](crate::Cache::get) and
/// [`Cache::request`](crate::Cache::request), so it must not block. It must also not call back
/// into the cache synchronously.
pub trait RequestDriver<A>: Send + Sync + 'static {
    fn dispatch(&self, request: NextRequest<A>);
}

/// A fetch strategy, bound once when a cache is built.
pub trait Strategy<A, D, E> {
    type Driver: RequestDriver<A>;

    fn bind(self, responder: Responder<A, D, E>) -> Self::Driver;
}

/// The completion channel of a cache, handed to its strategy.
///
/// Outcomes arriving after the cache was dropped are discarded.
pub struct Responder<A, D, E> {
    shared: Weak<Shared<A, D, E>>,
}

impl<A, D, E> Clone for Responder<A, D, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<A, D, E> Responder<A, D, E> {
    pub(crate) fn new(shared: Weak<Shared<A, D, E>>) -> Self {
        Self { shared }
    }
}

impl<A: Serialize, D, E> Responder<A, D, E> {
    pub fn receive(&self, received: Received<A, D, E>) {
        match self.shared.upgrade() {
            Some(shared) => shared.receive(received),
            None => tracing::trace!("Discarding outcome for a dropped cache"),
        }
    }
}
