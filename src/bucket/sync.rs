//! Synchronization disciplines for bucket state.
//!
//! A [`StateCell`] owns one [`BucketState`] and applies state transitions to it
//! atomically. Three interchangeable cells are provided:
//!
//! - [`LockFreeCell`]: optimistic copy-on-write. A transition runs against a
//!   private copy of the current snapshot, which is then published with a
//!   compare-and-swap. Losing a race throws the copy away and retries against
//!   the winner's snapshot. Callers never block.
//! - [`LockedCell`]: a mutex, one transition at a time.
//! - [`UnsynchronizedCell`]: in-place mutation that never waits, for buckets
//!   that are only ever used from one thread at a time.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::state::BucketState;

/// Which [`StateCell`] a bucket should be built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynchronizationStrategy {
    /// Optimistic compare-and-swap retry loop
    #[default]
    LockFree,
    /// Mutual exclusion
    Synchronized,
    /// No synchronization; single-threaded use only
    None,
}

/// Holder of a bucket state that applies transitions atomically.
pub trait StateCell: Send + Sync {
    fn new(state: BucketState) -> Self
    where
        Self: Sized;

    /// Apply `transition` atomically and return its output.
    ///
    /// The transition may be invoked more than once; only the invocation
    /// whose effects get published contributes the returned value.
    fn update<T, F>(&self, transition: F) -> T
    where
        F: FnMut(&mut BucketState) -> T;

    /// A consistent copy of the current state.
    fn snapshot(&self) -> BucketState;
}

/// Copy-on-write cell publishing immutable snapshots with compare-and-swap.
pub struct LockFreeCell {
    current: ArcSwap<BucketState>,
}

impl StateCell for LockFreeCell {
    fn new(state: BucketState) -> Self {
        Self {
            current: ArcSwap::from_pointee(state),
        }
    }

    fn update<T, F>(&self, mut transition: F) -> T
    where
        F: FnMut(&mut BucketState) -> T,
    {
        let mut attempts: u64 = 0;
        loop {
            attempts += 1;
            let snapshot = self.current.load_full();
            let mut next = BucketState::clone(&snapshot);
            let output = transition(&mut next);

            let previous = self.current.compare_and_swap(&snapshot, Arc::new(next));
            if Arc::ptr_eq(&*previous, &snapshot) {
                if attempts > 1 {
                    trace!(attempts, "Published bucket state after contention");
                }
                return output;
            }
            trace!(attempts, "Bucket state changed concurrently, retrying");
        }
    }

    fn snapshot(&self) -> BucketState {
        let current = self.current.load();
        BucketState::clone(&current)
    }
}

/// Mutex-guarded cell.
pub struct LockedCell {
    state: Mutex<BucketState>,
}

impl StateCell for LockedCell {
    fn new(state: BucketState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    fn update<T, F>(&self, mut transition: F) -> T
    where
        F: FnMut(&mut BucketState) -> T,
    {
        let mut state = self.state.lock();
        transition(&mut state)
    }

    fn snapshot(&self) -> BucketState {
        self.state.lock().clone()
    }
}

/// Cell for buckets used from one thread at a time.
///
/// The state sits behind a mutex that is only ever try-locked, so it never
/// waits. Overlapping access is a usage error and panics instead of blocking.
pub struct UnsynchronizedCell {
    state: Mutex<BucketState>,
}

impl UnsynchronizedCell {
    fn with_state<T>(&self, f: impl FnOnce(&mut BucketState) -> T) -> T {
        match self.state.try_lock() {
            Some(mut state) => f(&mut state),
            None => panic!("UnsynchronizedCell used concurrently; use a synchronized strategy instead"),
        }
    }
}

impl StateCell for UnsynchronizedCell {
    fn new(state: BucketState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    fn update<T, F>(&self, mut transition: F) -> T
    where
        F: FnMut(&mut BucketState) -> T,
    {
        self.with_state(|state| transition(state))
    }

    fn snapshot(&self) -> BucketState {
        self.with_state(|state| state.clone())
    }
}
