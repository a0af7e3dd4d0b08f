//! Bucketeer - token-bucket rate limiting
//!
//! This crate implements token buckets with any number of bandwidths, each
//! refilled greedily or at interval boundaries. Buckets are enforced either
//! locally, behind a configurable synchronization strategy, or against state
//! held in a shared store via serializable commands, optionally batched per key.

pub mod bucket;
pub mod config;
pub mod distributed;
pub mod error;

pub use bucket::{Bandwidth, Bucket, BucketBuilder, BucketConfiguration, LocalBucket, SynchronizationStrategy};
pub use config::BucketSettings;
pub use distributed::{BucketProxy, CommandExecutor, ProxyManager};
pub use error::{BucketError, ExecutionError, Result};
