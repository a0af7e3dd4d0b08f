//! Request batching for remote buckets.
//!
//! [`BatchingExecutor`] keeps at most one physical request per bucket key in
//! flight. Commands for a key that arrive while a request is in flight are
//! queued; once it completes, the whole queue goes out as a single
//! [`Command::Batch`] and the per-command results are handed back to each
//! caller. The store applies batch members in arrival order at one instant, so
//! every caller sees exactly what it would have seen executing alone.
//!
//! Physical requests run on spawned tokio tasks. Dropping a caller's future
//! only stops that caller from waiting; the request and the other callers
//! sharing it are unaffected.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use super::executor::{CommandExecutor, RequestOptimizer};
use crate::bucket::{Command, CommandResult};
use crate::error::ExecutionError;

type Reply = oneshot::Sender<Result<CommandResult, ExecutionError>>;

/// Optimizer producing [`BatchingExecutor`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchingOptimizer;

impl RequestOptimizer for BatchingOptimizer {
    fn optimize(&self, executor: Arc<dyn CommandExecutor>) -> Arc<dyn CommandExecutor> {
        Arc::new(BatchingExecutor::new(executor))
    }
}

/// Executor coalescing concurrent commands for the same key.
///
/// Must be used from within a tokio runtime.
pub struct BatchingExecutor {
    shared: Arc<Shared>,
}

struct Shared {
    target: Arc<dyn CommandExecutor>,
    /// A key is present while a request for it is in flight; the vector holds
    /// the commands waiting for the next batch.
    queues: Mutex<HashMap<String, Vec<Waiter>>>,
}

struct Waiter {
    command: Command,
    reply: Reply,
}

impl BatchingExecutor {
    pub fn new(target: Arc<dyn CommandExecutor>) -> Self {
        Self {
            shared: Arc::new(Shared {
                target,
                queues: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Number of commands queued behind the in-flight request for `key`.
    pub fn pending_commands(&self, key: &str) -> usize {
        self.shared.queues.lock().get(key).map_or(0, Vec::len)
    }

    /// Whether a physical request for `key` is currently in flight.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.shared.queues.lock().contains_key(key)
    }
}

#[async_trait]
impl CommandExecutor for BatchingExecutor {
    async fn execute(&self, key: &str, command: Command) -> Result<CommandResult, ExecutionError> {
        let (reply, receiver) = oneshot::channel();
        let waiter = Waiter { command, reply };

        let leader = {
            let mut queues = self.shared.queues.lock();
            match queues.get_mut(key) {
                Some(pending) => {
                    pending.push(waiter);
                    trace!(key = %key, queued = pending.len(), "Queued command behind in-flight request");
                    None
                }
                None => {
                    queues.insert(key.to_string(), Vec::new());
                    Some(waiter)
                }
            }
        };

        if let Some(first) = leader {
            let shared = Arc::clone(&self.shared);
            let key = key.to_string();
            tokio::spawn(async move { shared.drive(key, vec![first]).await });
        }

        receiver.await.map_err(|_| ExecutionError::Closed)?
    }
}

impl Shared {
    /// Send `batch`, then keep draining the key's queue until it is empty.
    async fn drive(self: Arc<Self>, key: String, mut batch: Vec<Waiter>) {
        let mut in_flight = InFlight {
            shared: &*self,
            key: &key,
            finished: false,
        };

        loop {
            self.dispatch(&key, batch).await;

            let next = {
                let mut queues = self.queues.lock();
                match queues.get_mut(&key) {
                    Some(pending) if !pending.is_empty() => Some(std::mem::take(pending)),
                    _ => {
                        queues.remove(&key);
                        None
                    }
                }
            };
            match next {
                Some(pending) => batch = pending,
                None => {
                    in_flight.finished = true;
                    return;
                }
            }
        }
    }

    async fn dispatch(&self, key: &str, waiters: Vec<Waiter>) {
        let BatchPlan { mut commands, replies } = BatchPlan::new(waiters);
        let expected = commands.len();
        let callers = replies.len();

        let command = match expected {
            1 => commands.swap_remove(0),
            _ => {
                debug!(key = %key, callers, commands = expected, "Dispatching batched commands");
                Command::Batch(commands)
            }
        };

        let results = match self.target.execute(key, command).await {
            Ok(result) => unpack(expected, result),
            Err(err) => Err(err),
        };

        match results {
            Ok(results) => {
                for (index, reply) in replies {
                    // receiver gone means the caller stopped waiting
                    let _ = reply.send(Ok(results[index].clone()));
                }
            }
            Err(err) => {
                warn!(key = %key, callers, error = %err, "Remote execution failed");
                for (_, reply) in replies {
                    let _ = reply.send(Err(err.clone()));
                }
            }
        }
    }
}

/// The physical commands of one batch and which result each caller gets.
struct BatchPlan {
    commands: Vec<Command>,
    replies: Vec<(usize, Reply)>,
}

impl BatchPlan {
    /// Consecutive identical read-only commands collapse into one.
    fn new(waiters: Vec<Waiter>) -> Self {
        let mut commands: Vec<Command> = Vec::with_capacity(waiters.len());
        let mut replies = Vec::with_capacity(waiters.len());

        for Waiter { command, reply } in waiters {
            let duplicate = command.is_read_only() && commands.last() == Some(&command);
            if !duplicate {
                commands.push(command);
            }
            replies.push((commands.len() - 1, reply));
        }

        Self { commands, replies }
    }
}

/// Split the store's answer into one result per physical command.
fn unpack(expected: usize, result: CommandResult) -> Result<Vec<CommandResult>, ExecutionError> {
    if expected == 1 {
        return Ok(vec![result]);
    }
    match result {
        CommandResult::Batch(results) if results.len() == expected => Ok(results),
        CommandResult::Batch(results) => Err(ExecutionError::UnexpectedResult(format!(
            "expected {} batch results, got {}",
            expected,
            results.len()
        ))),
        other => Err(ExecutionError::UnexpectedResult(format!(
            "expected batch result, got {:?}",
            other
        ))),
    }
}

/// Releases a key if its driver dies before draining the queue, so later
/// commands are not stuck behind a request that will never complete.
struct InFlight<'a> {
    shared: &'a Shared,
    key: &'a str,
    finished: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(key = %self.key, "Batch driver stopped early, releasing queued commands");
            self.shared.queues.lock().remove(self.key);
        }
    }
}
