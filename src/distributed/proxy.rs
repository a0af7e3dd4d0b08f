//! Client-side handles for buckets kept in a remote store.

use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use super::executor::{CommandExecutor, RequestOptimizer};
use crate::bucket::{BucketConfiguration, Command, CommandResult, ConsumptionProbe, DelayEstimate, EstimationProbe};
use crate::error::ExecutionError;

/// Hands out [`BucketProxy`]s sharing one executor and configuration.
#[derive(Clone)]
pub struct ProxyManager {
    configuration: BucketConfiguration,
    executor: Arc<dyn CommandExecutor>,
}

impl ProxyManager {
    /// Proxies talking to `executor` directly.
    pub fn new(configuration: BucketConfiguration, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            configuration,
            executor,
        }
    }

    /// Proxies talking to `executor` through `optimizer`.
    pub fn with_optimizer(
        configuration: BucketConfiguration,
        executor: Arc<dyn CommandExecutor>,
        optimizer: &dyn RequestOptimizer,
    ) -> Self {
        Self::new(configuration, optimizer.optimize(executor))
    }

    /// Proxy for the bucket stored under `key`.
    pub fn bucket(&self, key: impl Into<String>) -> BucketProxy {
        BucketProxy {
            key: key.into(),
            configuration: self.configuration.clone(),
            executor: Arc::clone(&self.executor),
        }
    }
}

/// Remote counterpart of [`Bucket`](crate::bucket::Bucket).
///
/// Every method becomes one command for the proxy's key. Amounts are
/// validated locally before anything is sent.
#[derive(Clone)]
pub struct BucketProxy {
    key: String,
    configuration: BucketConfiguration,
    executor: Arc<dyn CommandExecutor>,
}

impl BucketProxy {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn try_consume(&self, tokens: u64) -> Result<bool, ExecutionError> {
        self.configuration.check_tokens_to_consume(tokens)?;
        match self.execute(Command::TryConsume { tokens }).await? {
            CommandResult::Consumed(consumed) => Ok(consumed),
            other => Err(unexpected(other)),
        }
    }

    pub async fn try_consume_and_return_remaining(&self, tokens: u64) -> Result<ConsumptionProbe, ExecutionError> {
        self.configuration.check_tokens_to_consume(tokens)?;
        match self.execute(Command::TryConsumeAndReturnRemaining { tokens }).await? {
            CommandResult::Probe(probe) => Ok(probe),
            other => Err(unexpected(other)),
        }
    }

    pub async fn try_consume_or_estimate_delay(&self, tokens: u64) -> Result<DelayEstimate, ExecutionError> {
        self.configuration.check_tokens_to_consume(tokens)?;
        match self.execute(Command::ConsumeOrEstimateDelay { tokens }).await? {
            CommandResult::Delay(estimate) => Ok(estimate),
            other => Err(unexpected(other)),
        }
    }

    pub async fn estimate_ability_to_consume(&self, tokens: u64) -> Result<EstimationProbe, ExecutionError> {
        self.configuration.check_tokens_to_consume(tokens)?;
        match self.execute(Command::EstimateAbilityToConsume { tokens }).await? {
            CommandResult::Estimation(probe) => Ok(probe),
            other => Err(unexpected(other)),
        }
    }

    pub async fn available_tokens(&self) -> Result<u64, ExecutionError> {
        match self.execute(Command::GetAvailableTokens).await? {
            CommandResult::AvailableTokens(tokens) => Ok(tokens.max(0) as u64),
            other => Err(unexpected(other)),
        }
    }

    pub async fn add_tokens(&self, tokens: u64) -> Result<(), ExecutionError> {
        if tokens == 0 {
            return Err(crate::error::BucketError::NonPositiveAmount.into());
        }
        match self.execute(Command::AddTokens { tokens }).await? {
            CommandResult::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn try_reserve(&self, tokens: u64, max_wait: Duration) -> Result<Option<Duration>, ExecutionError> {
        self.configuration.check_tokens_to_consume(tokens)?;
        let max_wait_nanos = u64::try_from(max_wait.as_nanos()).unwrap_or(u64::MAX);
        match self.execute(Command::Reserve { tokens, max_wait_nanos }).await? {
            CommandResult::Reserved(wait) => Ok(wait.map(Duration::from_nanos)),
            other => Err(unexpected(other)),
        }
    }

    /// Reserve `tokens` remotely and sleep until the reservation matures.
    pub async fn consume_within(&self, tokens: u64, max_wait: Duration) -> Result<bool, ExecutionError> {
        match self.try_reserve(tokens, max_wait).await? {
            Some(wait) => {
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn execute(&self, command: Command) -> Result<CommandResult, ExecutionError> {
        trace!(key = %self.key, command = ?command, "Submitting command");
        self.executor.execute(&self.key, command).await
    }
}

fn unexpected(result: CommandResult) -> ExecutionError {
    ExecutionError::UnexpectedResult(format!("{:?}", result))
}
