//! Command execution against a remote store.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::batching::BatchingOptimizer;
use crate::bucket::{Command, CommandResult};
use crate::error::ExecutionError;

/// Sends a command for one bucket key to the store holding its state.
///
/// The store applies the command to the persisted state of `key` atomically
/// and answers with the matching [`CommandResult`].
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, key: &str, command: Command) -> Result<CommandResult, ExecutionError>;
}

/// Wraps an executor into one with the same contract but fewer round-trips.
pub trait RequestOptimizer: Send + Sync {
    fn optimize(&self, executor: Arc<dyn CommandExecutor>) -> Arc<dyn CommandExecutor>;
}

/// Optimizer that returns the executor untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOptimization;

impl RequestOptimizer for NoOptimization {
    fn optimize(&self, executor: Arc<dyn CommandExecutor>) -> Arc<dyn CommandExecutor> {
        executor
    }
}

/// Named request optimizers, selectable from settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationKind {
    /// Every command is its own request
    #[default]
    None,
    /// Coalesce concurrent commands per key
    Batching,
}

impl OptimizationKind {
    pub fn optimizer(&self) -> Box<dyn RequestOptimizer> {
        match self {
            OptimizationKind::None => Box::new(NoOptimization),
            OptimizationKind::Batching => Box::new(BatchingOptimizer),
        }
    }
}
