//! A client-side cache for fetched data.
//!
//! Data is looked up by argument values rather than by hand-made keys. The [`Cache`] records
//! the fetch state of every args as an [`Entry`], deduplicates concurrent fetches, refetches
//! stale data and hands every fetch it decides on to a [`Strategy`]: [`Direct`] fetches,
//! a [`Pipeline`] of stream stages, or a [`Batched`] window that groups args into one grouped
//! fetch. Entries of different caches can be combined into one [`Merged`] view whose readiness
//! is decided by a [`PriorityExpr`].

#[macro_use]
pub mod metrics;

pub mod batch;
pub mod cache;
pub mod config;
pub mod driver;
pub mod entry;
pub mod key;
pub mod logging;
pub mod merge;
pub mod priority;
pub mod staleness;

pub use batch::{BatchOptions, Batched};
pub use cache::{
    Cache, CacheBuilder, CacheOptions, GetOptions, NextRequest, Received, RequestOptions,
};
pub use driver::{Direct, Pipeline, RequestDriver, Responder, Strategy};
pub use entry::{AwaitError, Entry, EntryHandle, EntryState};
pub use key::{CacheKey, to_key};
pub use merge::Merged;
pub use priority::{PriorityError, PriorityExpr, Status};
pub use staleness::Staleness;
