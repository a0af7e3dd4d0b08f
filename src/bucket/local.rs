//! In-process buckets.

use std::time::Duration;

use tracing::trace;

use super::command::{Command, CommandResult, ConsumptionProbe, DelayEstimate, EstimationProbe};
use super::configuration::BucketConfiguration;
use super::state::BucketState;
use super::sync::{LockFreeCell, StateCell};
use crate::error::{BucketError, Result};

/// Local enforcement API.
///
/// Object safe, so buckets built with different synchronization strategies
/// can be used behind one `Box<dyn Bucket>`.
pub trait Bucket: Send + Sync {
    /// Consume `tokens` if all bandwidths currently allow it.
    fn try_consume(&self, tokens: u64) -> Result<bool>;

    /// Like [`try_consume`](Self::try_consume), also reporting what is left.
    fn try_consume_and_return_remaining(&self, tokens: u64) -> Result<ConsumptionProbe>;

    /// Consume `tokens` or report how long until that would be possible.
    fn try_consume_or_estimate_delay(&self, tokens: u64) -> Result<DelayEstimate>;

    /// Check whether `tokens` could be consumed now, without consuming.
    fn estimate_ability_to_consume(&self, tokens: u64) -> Result<EstimationProbe>;

    /// Tokens consumable right now. Overdraft from reservations reads as zero.
    fn available_tokens(&self) -> u64;

    /// Administrative top-up, clamped to capacity.
    fn add_tokens(&self, tokens: u64) -> Result<()>;

    /// Consume `tokens` now, overdrawing if necessary, provided the wait until
    /// they are actually available is at most `max_wait`.
    ///
    /// Returns the time the caller must wait before using the tokens, or
    /// `None` if no reservation was made.
    fn try_reserve(&self, tokens: u64, max_wait: Duration) -> Result<Option<Duration>>;
}

/// A bucket living in process memory.
///
/// The state cell `C` decides the synchronization discipline.
pub struct LocalBucket<C: StateCell = LockFreeCell> {
    configuration: BucketConfiguration,
    cell: C,
}

impl<C: StateCell> LocalBucket<C> {
    /// Create a bucket whose state is initialized at the configuration's current time.
    pub fn new(configuration: BucketConfiguration) -> Self {
        let now = configuration.time_meter().now_nanos();
        let state = BucketState::new(configuration.bandwidths(), now);
        Self {
            configuration,
            cell: C::new(state),
        }
    }

    pub fn configuration(&self) -> &BucketConfiguration {
        &self.configuration
    }

    /// A copy of the current state, without refilling it.
    pub fn snapshot(&self) -> BucketState {
        self.cell.snapshot()
    }

    /// Apply a command atomically at the current time.
    pub fn execute(&self, command: &Command) -> CommandResult {
        let bandwidths = self.configuration.bandwidths();
        let now = self.configuration.time_meter().now_nanos();
        let result = self.cell.update(|state| command.apply(state, bandwidths, now));
        trace!(command = ?command, result = ?result, now, "Applied command to local bucket");
        result
    }

    /// Reserve `tokens` and sleep until the reservation matures.
    ///
    /// Returns `false` without waiting when the reservation would take longer
    /// than `max_wait`.
    pub async fn consume_within(&self, tokens: u64, max_wait: Duration) -> Result<bool> {
        match self.try_reserve(tokens, max_wait)? {
            Some(wait) => {
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl<C: StateCell> Bucket for LocalBucket<C> {
    fn try_consume(&self, tokens: u64) -> Result<bool> {
        self.configuration.check_tokens_to_consume(tokens)?;
        let command = Command::TryConsume { tokens };
        match self.execute(&command) {
            CommandResult::Consumed(consumed) => Ok(consumed),
            other => mismatched(&command, other),
        }
    }

    fn try_consume_and_return_remaining(&self, tokens: u64) -> Result<ConsumptionProbe> {
        self.configuration.check_tokens_to_consume(tokens)?;
        let command = Command::TryConsumeAndReturnRemaining { tokens };
        match self.execute(&command) {
            CommandResult::Probe(probe) => Ok(probe),
            other => mismatched(&command, other),
        }
    }

    fn try_consume_or_estimate_delay(&self, tokens: u64) -> Result<DelayEstimate> {
        self.configuration.check_tokens_to_consume(tokens)?;
        let command = Command::ConsumeOrEstimateDelay { tokens };
        match self.execute(&command) {
            CommandResult::Delay(estimate) => Ok(estimate),
            other => mismatched(&command, other),
        }
    }

    fn estimate_ability_to_consume(&self, tokens: u64) -> Result<EstimationProbe> {
        self.configuration.check_tokens_to_consume(tokens)?;
        let command = Command::EstimateAbilityToConsume { tokens };
        match self.execute(&command) {
            CommandResult::Estimation(probe) => Ok(probe),
            other => mismatched(&command, other),
        }
    }

    fn available_tokens(&self) -> u64 {
        let command = Command::GetAvailableTokens;
        match self.execute(&command) {
            CommandResult::AvailableTokens(tokens) => tokens.max(0) as u64,
            other => mismatched(&command, other),
        }
    }

    fn add_tokens(&self, tokens: u64) -> Result<()> {
        if tokens == 0 {
            return Err(BucketError::NonPositiveAmount);
        }
        self.execute(&Command::AddTokens { tokens });
        Ok(())
    }

    fn try_reserve(&self, tokens: u64, max_wait: Duration) -> Result<Option<Duration>> {
        self.configuration.check_tokens_to_consume(tokens)?;
        let max_wait_nanos = u64::try_from(max_wait.as_nanos()).unwrap_or(u64::MAX);
        let command = Command::Reserve { tokens, max_wait_nanos };
        match self.execute(&command) {
            CommandResult::Reserved(wait) => Ok(wait.map(Duration::from_nanos)),
            other => mismatched(&command, other),
        }
    }
}

/// `Command::apply` answers every command with its own result variant.
fn mismatched(command: &Command, result: CommandResult) -> ! {
    unreachable!("{:?} produced {:?}", command, result)
}
