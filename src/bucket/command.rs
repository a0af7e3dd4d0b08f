//! Bucket operations as data.
//!
//! Every operation a bucket supports is a [`Command`]. Local buckets apply
//! commands through their state cell; remote stores receive the same commands
//! over the wire and apply them to persisted state, so both sides share one
//! implementation of the token arithmetic.

use serde::{Deserialize, Serialize};

use super::bandwidth::Bandwidth;
use super::state::BucketState;

/// One logical bucket operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "args", rename_all = "snake_case")]
pub enum Command {
    /// Consume if possible, report only whether it happened.
    TryConsume { tokens: u64 },
    /// Consume if possible, report remaining tokens and wait time.
    TryConsumeAndReturnRemaining { tokens: u64 },
    /// Consume if possible, otherwise report the delay until it would be.
    ConsumeOrEstimateDelay { tokens: u64 },
    /// Check whether `tokens` could be consumed now without consuming.
    EstimateAbilityToConsume { tokens: u64 },
    /// Read the current number of available tokens.
    GetAvailableTokens,
    /// Administrative top-up.
    AddTokens { tokens: u64 },
    /// Consume now, possibly overdrawing, if the wait fits within `max_wait_nanos`.
    Reserve { tokens: u64, max_wait_nanos: u64 },
    /// Several commands applied in order at the same instant.
    Batch(Vec<Command>),
}

/// Result of [`Command::TryConsumeAndReturnRemaining`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionProbe {
    pub consumed: bool,
    pub remaining_tokens: u64,
    /// Zero when consumed
    pub nanos_to_wait_for_refill: u64,
}

/// Result of [`Command::ConsumeOrEstimateDelay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayEstimate {
    pub granted: bool,
    pub tokens_consumed: u64,
    pub nanos_until_possible: u64,
}

/// Result of [`Command::EstimateAbilityToConsume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimationProbe {
    pub can_be_consumed: bool,
    pub remaining_tokens: u64,
    pub nanos_to_wait_for_refill: u64,
}

/// Outcome of applying a [`Command`], mirroring its variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CommandResult {
    Consumed(bool),
    Probe(ConsumptionProbe),
    Delay(DelayEstimate),
    Estimation(EstimationProbe),
    AvailableTokens(i64),
    Done,
    /// Nanos to wait for the reservation, `None` if it was not made
    Reserved(Option<u64>),
    Batch(Vec<CommandResult>),
}

impl Command {
    /// Whether applying this command can change the token counts.
    ///
    /// Read-only commands applied back to back at the same instant always
    /// produce the same result.
    pub fn is_read_only(&self) -> bool {
        match self {
            Command::GetAvailableTokens | Command::EstimateAbilityToConsume { .. } => true,
            Command::Batch(commands) => commands.iter().all(Command::is_read_only),
            _ => false,
        }
    }

    /// Refill `state` to `now` and apply this command to it.
    pub fn apply(&self, state: &mut BucketState, bandwidths: &[Bandwidth], now: u64) -> CommandResult {
        state.refill_all_bandwidth(bandwidths, now);
        self.apply_refilled(state, bandwidths, now)
    }

    fn apply_refilled(&self, state: &mut BucketState, bandwidths: &[Bandwidth], now: u64) -> CommandResult {
        match *self {
            Command::TryConsume { tokens } => {
                let consumed = has_tokens(state, tokens);
                if consumed {
                    state.consume(tokens);
                }
                CommandResult::Consumed(consumed)
            }
            Command::TryConsumeAndReturnRemaining { tokens } => {
                let consumed = has_tokens(state, tokens);
                let nanos_to_wait_for_refill = if consumed {
                    state.consume(tokens);
                    0
                } else {
                    state.delay_nanos_until_possible(bandwidths, tokens, now)
                };
                CommandResult::Probe(ConsumptionProbe {
                    consumed,
                    remaining_tokens: remaining(state),
                    nanos_to_wait_for_refill,
                })
            }
            Command::ConsumeOrEstimateDelay { tokens } => {
                if has_tokens(state, tokens) {
                    state.consume(tokens);
                    CommandResult::Delay(DelayEstimate {
                        granted: true,
                        tokens_consumed: tokens,
                        nanos_until_possible: 0,
                    })
                } else {
                    CommandResult::Delay(DelayEstimate {
                        granted: false,
                        tokens_consumed: 0,
                        nanos_until_possible: state.delay_nanos_until_possible(bandwidths, tokens, now),
                    })
                }
            }
            Command::EstimateAbilityToConsume { tokens } => {
                let can_be_consumed = has_tokens(state, tokens);
                let nanos_to_wait_for_refill = if can_be_consumed {
                    0
                } else {
                    state.delay_nanos_until_possible(bandwidths, tokens, now)
                };
                CommandResult::Estimation(EstimationProbe {
                    can_be_consumed,
                    remaining_tokens: remaining(state),
                    nanos_to_wait_for_refill,
                })
            }
            Command::GetAvailableTokens => CommandResult::AvailableTokens(state.available_tokens()),
            Command::AddTokens { tokens } => {
                state.add_tokens(bandwidths, tokens);
                CommandResult::Done
            }
            Command::Reserve { tokens, max_wait_nanos } => {
                let wait = state.delay_nanos_until_possible(bandwidths, tokens, now);
                if wait > max_wait_nanos || !fits_capacity(bandwidths, tokens) {
                    return CommandResult::Reserved(None);
                }
                state.consume(tokens);
                CommandResult::Reserved(Some(wait))
            }
            Command::Batch(ref commands) => CommandResult::Batch(
                commands
                    .iter()
                    .map(|command| command.apply_refilled(state, bandwidths, now))
                    .collect(),
            ),
        }
    }
}

fn has_tokens(state: &BucketState, tokens: u64) -> bool {
    state.available_tokens() >= 0 && state.available_tokens() as u64 >= tokens
}

fn remaining(state: &BucketState) -> u64 {
    state.available_tokens().max(0) as u64
}

fn fits_capacity(bandwidths: &[Bandwidth], tokens: u64) -> bool {
    bandwidths.iter().all(|bandwidth| tokens <= bandwidth.capacity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn bandwidths() -> Vec<Bandwidth> {
        vec![Bandwidth::simple(10, Duration::from_secs(1)).with_initial_tokens(3)]
    }

    #[test]
    fn test_try_consume() {
        let bandwidths = bandwidths();
        let mut state = BucketState::new(&bandwidths, 0);

        assert_eq!(Command::TryConsume { tokens: 3 }.apply(&mut state, &bandwidths, 0), CommandResult::Consumed(true));
        assert_eq!(Command::TryConsume { tokens: 1 }.apply(&mut state, &bandwidths, 0), CommandResult::Consumed(false));
        assert_eq!(state.available_tokens(), 0);
    }

    #[test]
    fn test_try_consume_and_return_remaining() {
        let bandwidths = bandwidths();
        let mut state = BucketState::new(&bandwidths, 0);

        let granted = Command::TryConsumeAndReturnRemaining { tokens: 2 }.apply(&mut state, &bandwidths, 0);
        assert_eq!(
            granted,
            CommandResult::Probe(ConsumptionProbe {
                consumed: true,
                remaining_tokens: 1,
                nanos_to_wait_for_refill: 0,
            })
        );

        let denied = Command::TryConsumeAndReturnRemaining { tokens: 3 }.apply(&mut state, &bandwidths, 0);
        assert_eq!(
            denied,
            CommandResult::Probe(ConsumptionProbe {
                consumed: false,
                remaining_tokens: 1,
                nanos_to_wait_for_refill: 200_000_000,
            })
        );
    }

    #[test]
    fn test_consume_or_estimate_delay() {
        let bandwidths = bandwidths();
        let mut state = BucketState::new(&bandwidths, 0);

        let denied = Command::ConsumeOrEstimateDelay { tokens: 5 }.apply(&mut state, &bandwidths, 0);
        assert_eq!(
            denied,
            CommandResult::Delay(DelayEstimate {
                granted: false,
                tokens_consumed: 0,
                nanos_until_possible: 200_000_000,
            })
        );

        let granted = Command::ConsumeOrEstimateDelay { tokens: 5 }.apply(&mut state, &bandwidths, 200_000_000);
        assert_eq!(
            granted,
            CommandResult::Delay(DelayEstimate {
                granted: true,
                tokens_consumed: 5,
                nanos_until_possible: 0,
            })
        );
    }

    #[test]
    fn test_estimate_does_not_consume() {
        let bandwidths = bandwidths();
        let mut state = BucketState::new(&bandwidths, 0);

        let estimate = Command::EstimateAbilityToConsume { tokens: 3 }.apply(&mut state, &bandwidths, 0);
        assert!(matches!(estimate, CommandResult::Estimation(EstimationProbe { can_be_consumed: true, .. })));
        assert_eq!(Command::GetAvailableTokens.apply(&mut state, &bandwidths, 0), CommandResult::AvailableTokens(3));
    }

    #[test]
    fn test_reserve_overdraws_within_wait() {
        let bandwidths = bandwidths();
        let mut state = BucketState::new(&bandwidths, 0);

        let reserved = Command::Reserve { tokens: 5, max_wait_nanos: 1_000_000_000 }.apply(&mut state, &bandwidths, 0);
        assert_eq!(reserved, CommandResult::Reserved(Some(200_000_000)));
        assert_eq!(state.available_tokens(), -2);

        let too_long = Command::Reserve { tokens: 5, max_wait_nanos: 1 }.apply(&mut state, &bandwidths, 0);
        assert_eq!(too_long, CommandResult::Reserved(None));

        let too_big = Command::Reserve { tokens: 11, max_wait_nanos: u64::MAX }.apply(&mut state, &bandwidths, 0);
        assert_eq!(too_big, CommandResult::Reserved(None));
    }

    #[test]
    fn test_batch_applies_in_order() {
        let bandwidths = bandwidths();
        let mut state = BucketState::new(&bandwidths, 0);

        let batch = Command::Batch(vec![
            Command::TryConsume { tokens: 2 },
            Command::GetAvailableTokens,
            Command::TryConsume { tokens: 2 },
            Command::AddTokens { tokens: 4 },
            Command::GetAvailableTokens,
        ]);
        assert!(!batch.is_read_only());

        assert_eq!(
            batch.apply(&mut state, &bandwidths, 0),
            CommandResult::Batch(vec![
                CommandResult::Consumed(true),
                CommandResult::AvailableTokens(1),
                CommandResult::Consumed(false),
                CommandResult::Done,
                CommandResult::AvailableTokens(5),
            ])
        );
    }

    #[test]
    fn test_command_serialization() {
        let command = Command::Batch(vec![Command::TryConsume { tokens: 1 }, Command::GetAvailableTokens]);
        let json = serde_json::to_string(&command).unwrap();
        assert_eq!(serde_json::from_str::<Command>(&json).unwrap(), command);

        let result = CommandResult::Reserved(Some(42));
        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(serde_json::from_str::<CommandResult>(&json).unwrap(), result);
    }

    #[test]
    fn test_every_command_answers_with_its_own_variant() {
        let bandwidths = bandwidths();
        let mut state = BucketState::new(&bandwidths, 0);
        let commands = [
            Command::TryConsume { tokens: 1 },
            Command::TryConsumeAndReturnRemaining { tokens: 1 },
            Command::ConsumeOrEstimateDelay { tokens: 1 },
            Command::EstimateAbilityToConsume { tokens: 1 },
            Command::GetAvailableTokens,
            Command::AddTokens { tokens: 1 },
            Command::Reserve { tokens: 1, max_wait_nanos: 0 },
            Command::Batch(vec![Command::GetAvailableTokens]),
        ];

        for command in commands {
            let result = command.apply(&mut state, &bandwidths, 0);
            let matches = match (&command, &result) {
                (Command::TryConsume { .. }, CommandResult::Consumed(_)) => true,
                (Command::TryConsumeAndReturnRemaining { .. }, CommandResult::Probe(_)) => true,
                (Command::ConsumeOrEstimateDelay { .. }, CommandResult::Delay(_)) => true,
                (Command::EstimateAbilityToConsume { .. }, CommandResult::Estimation(_)) => true,
                (Command::GetAvailableTokens, CommandResult::AvailableTokens(_)) => true,
                (Command::AddTokens { .. }, CommandResult::Done) => true,
                (Command::Reserve { .. }, CommandResult::Reserved(_)) => true,
                (Command::Batch(commands), CommandResult::Batch(results)) => commands.len() == results.len(),
                _ => false,
            };
            assert!(matches, "{:?} produced {:?}", command, result);
        }
    }
}
