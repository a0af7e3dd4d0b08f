//! Buckets whose state lives in a shared store.
//!
//! A [`BucketProxy`] turns each bucket operation into a [`Command`](crate::bucket::Command)
//! sent through a [`CommandExecutor`]. The store applies the command to the
//! persisted [`BucketState`](crate::bucket::BucketState) using the same
//! arithmetic as local buckets. [`RequestOptimizer`]s wrap the executor, e.g.
//! to coalesce concurrent commands for one key into a single request.

mod batching;
mod executor;
mod proxy;
mod store;

pub use batching::{BatchingExecutor, BatchingOptimizer};
pub use executor::{CommandExecutor, NoOptimization, OptimizationKind, RequestOptimizer};
pub use proxy::{BucketProxy, ProxyManager};
pub use store::InMemoryStore;
