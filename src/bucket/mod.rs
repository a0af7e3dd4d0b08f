//! Token buckets: bandwidths, state accounting and local enforcement.

mod bandwidth;
mod command;
mod configuration;
mod local;
mod state;
mod sync;
mod time;

pub use bandwidth::{check_bandwidths, Bandwidth};
pub use command::{Command, CommandResult, ConsumptionProbe, DelayEstimate, EstimationProbe};
pub use configuration::{BucketBuilder, BucketConfiguration};
pub use local::{Bucket, LocalBucket};
pub use state::BucketState;
pub use sync::{LockFreeCell, LockedCell, StateCell, SynchronizationStrategy, UnsynchronizedCell};
pub use time::{ManualTimeMeter, SystemMillis, SystemNanotime, TimeMeter};
