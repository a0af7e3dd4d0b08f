//! In-memory stand-in for a remote bucket store.
//!
//! [`InMemoryStore`] keeps every bucket's state serialized, the way a key-value
//! store would, and applies commands to it under a per-key lock. Artificial
//! latency and injected failures make it usable for exercising the
//! distributed layer without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::executor::CommandExecutor;
use crate::bucket::{BucketConfiguration, BucketState, Command, CommandResult};
use crate::error::ExecutionError;

/// Store holding serialized bucket states keyed by bucket key.
pub struct InMemoryStore {
    configuration: BucketConfiguration,
    states: DashMap<String, String>,
    latency: Option<Duration>,
    requests: AtomicU64,
    /// Request number (1-based) to the failure it should produce
    injected_failures: Mutex<HashMap<u64, String>>,
}

impl InMemoryStore {
    /// Create a store whose buckets all follow `configuration`.
    ///
    /// A key's state is created lazily on its first command.
    pub fn new(configuration: BucketConfiguration) -> Self {
        Self {
            configuration,
            states: DashMap::new(),
            latency: None,
            requests: AtomicU64::new(0),
            injected_failures: Mutex::new(HashMap::new()),
        }
    }

    /// Delay every request by `latency` before it touches state.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next request fail with `message`.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.fail_next_after(0, message);
    }

    /// Let `skip` requests through, then fail the one after them with `message`.
    pub fn fail_next_after(&self, skip: u64, message: impl Into<String>) {
        let target = self.request_count() + skip + 1;
        self.injected_failures.lock().insert(target, message.into());
    }

    /// Number of physical requests received so far.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    /// Decoded state stored for `key`, if any.
    pub fn state(&self, key: &str) -> Option<BucketState> {
        self.states
            .get(key)
            .and_then(|encoded| serde_json::from_str(encoded.value()).ok())
    }

    /// Number of keys with stored state.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    fn apply(&self, key: &str, command: &Command) -> Result<CommandResult, ExecutionError> {
        let bandwidths = self.configuration.bandwidths();
        let now = self.configuration.time_meter().now_nanos();

        let mut entry = self.states.entry(key.to_string()).or_insert_with(|| {
            debug!(key = %key, "Creating initial bucket state");
            encode(&BucketState::new(bandwidths, now)).unwrap_or_default()
        });

        let mut state: BucketState = serde_json::from_str(entry.value())
            .map_err(|e| ExecutionError::Remote(format!("corrupted state for key {}: {}", key, e)))?;
        let result = command.apply(&mut state, bandwidths, now);
        *entry.value_mut() = encode(&state)?;

        trace!(key = %key, command = ?command, result = ?result, "Applied command in store");
        Ok(result)
    }
}

fn encode(state: &BucketState) -> Result<String, ExecutionError> {
    serde_json::to_string(state).map_err(|e| ExecutionError::Remote(format!("failed to encode state: {}", e)))
}

#[async_trait]
impl CommandExecutor for InMemoryStore {
    async fn execute(&self, key: &str, command: Command) -> Result<CommandResult, ExecutionError> {
        let number = self.requests.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let injected = self.injected_failures.lock().remove(&number);
        if let Some(message) = injected {
            return Err(ExecutionError::Remote(message));
        }

        self.apply(key, &command)
    }
}
