//! Per-bucket token accounting.
//!
//! [`BucketState`] keeps one fractional token count and one last-refill
//! timestamp per bandwidth. All arithmetic on tokens is done in `f64` so that
//! partial refills accumulate between calls instead of being truncated.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::bandwidth::Bandwidth;

/// Mutable state of one logical bucket.
///
/// Both vectors are indexed by bandwidth position. Cloning produces an
/// independent snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    tokens: Vec<f64>,
    last_refill_time_nanos: Vec<u64>,
}

impl BucketState {
    /// Create the initial state for `bandwidths` at `now`.
    pub fn new(bandwidths: &[Bandwidth], now: u64) -> Self {
        Self {
            tokens: bandwidths.iter().map(|b| b.initial_tokens as f64).collect(),
            last_refill_time_nanos: bandwidths.iter().map(|b| b.initial_refill_time(now)).collect(),
        }
    }

    pub fn tokens(&self) -> &[f64] {
        &self.tokens
    }

    pub fn last_refill_time_nanos(&self) -> &[u64] {
        &self.last_refill_time_nanos
    }

    /// Overwrite this state with `other` without reallocating.
    pub fn copy_state_from(&mut self, other: &BucketState) {
        self.tokens.copy_from_slice(&other.tokens);
        self.last_refill_time_nanos.copy_from_slice(&other.last_refill_time_nanos);
    }

    /// Tokens consumable right now: the tightest bandwidth, floored.
    ///
    /// Negative when a reservation has overdrawn the bucket.
    pub fn available_tokens(&self) -> i64 {
        self.tokens
            .iter()
            .map(|tokens| tokens.floor() as i64)
            .min()
            .unwrap_or(0)
    }

    /// Subtract `to_consume` from every bandwidth. Tokens may go negative.
    pub fn consume(&mut self, to_consume: u64) {
        let to_consume = to_consume as f64;
        for tokens in self.tokens.iter_mut() {
            *tokens -= to_consume;
        }
    }

    /// Administrative top-up, clamped to each bandwidth's capacity.
    pub fn add_tokens(&mut self, bandwidths: &[Bandwidth], tokens_to_add: u64) {
        for (tokens, bandwidth) in self.tokens.iter_mut().zip(bandwidths) {
            let capacity = bandwidth.capacity as f64;
            *tokens = (*tokens + tokens_to_add as f64).min(capacity);
        }
    }

    /// Bring every bandwidth up to date with `now`.
    pub fn refill_all_bandwidth(&mut self, bandwidths: &[Bandwidth], now: u64) {
        for (index, bandwidth) in bandwidths.iter().enumerate() {
            self.refill(index, bandwidth, now);
        }
    }

    fn refill(&mut self, index: usize, bandwidth: &Bandwidth, now: u64) {
        let update = refilled(self.tokens[index], self.last_refill_time_nanos[index], bandwidth, now);
        if let Some((tokens, refill_time)) = update {
            self.tokens[index] = tokens;
            self.last_refill_time_nanos[index] = refill_time;
        }
    }

    /// Nanoseconds until `tokens_to_consume` can be consumed, assuming the
    /// state was refilled at `now`. Zero when already possible.
    ///
    /// The slowest bandwidth decides. Requests above a bandwidth's capacity
    /// and results that do not fit in `u64` saturate to `u64::MAX`.
    pub fn delay_nanos_until_possible(
        &self,
        bandwidths: &[Bandwidth],
        tokens_to_consume: u64,
        now: u64,
    ) -> u64 {
        bandwidths
            .iter()
            .enumerate()
            .map(|(index, bandwidth)| self.delay_for_bandwidth(index, bandwidth, tokens_to_consume, now))
            .max()
            .unwrap_or(0)
    }

    fn delay_for_bandwidth(&self, index: usize, bandwidth: &Bandwidth, tokens_to_consume: u64, now: u64) -> u64 {
        let current = self.tokens[index];
        let requested = tokens_to_consume as f64;
        if requested <= current {
            return 0;
        }
        if tokens_to_consume > bandwidth.capacity {
            return u64::MAX;
        }
        let deficit = requested - current;

        let estimate = if bandwidth.refill_intervally {
            self.interval_delay(index, bandwidth, deficit, now)
        } else {
            (bandwidth.refill_period_nanos as f64 * deficit / bandwidth.refill_tokens as f64).ceil()
        };
        let estimate = saturating_nanos(estimate);
        if estimate == u64::MAX {
            return u64::MAX;
        }

        // the closed form and refill round differently, refill has the last word
        let previous_refill = self.last_refill_time_nanos[index];
        let covered = |delay: u64| match now.checked_add(delay) {
            Some(at) => refilled(current, previous_refill, bandwidth, at).is_some_and(|(tokens, _)| tokens >= requested),
            None => true,
        };
        let delay = earliest_covering(estimate, covered);
        if now.checked_add(delay).is_none() {
            return u64::MAX;
        }
        delay
    }

    fn interval_delay(&self, index: usize, bandwidth: &Bandwidth, deficit: f64, now: u64) -> f64 {
        let period = bandwidth.refill_period_nanos;
        let refill_tokens = bandwidth.refill_tokens as f64;

        let next_refill = self.last_refill_time_nanos[index].saturating_add(period);
        let wait_for_next_refill = next_refill.saturating_sub(now) as f64;
        if deficit <= refill_tokens {
            return wait_for_next_refill;
        }

        let remaining_periods = ((deficit - refill_tokens) / refill_tokens).ceil();
        remaining_periods * period as f64 + wait_for_next_refill
    }
}

/// Tokens of one bandwidth after refilling it from `previous_refill` to `now`,
/// together with the new refill time. `None` when nothing is due yet.
fn refilled(tokens: f64, previous_refill: u64, bandwidth: &Bandwidth, mut now: u64) -> Option<(f64, u64)> {
    if now <= previous_refill {
        return None;
    }

    let period = bandwidth.refill_period_nanos;
    if bandwidth.refill_intervally {
        now -= (now - previous_refill) % period;
        if now <= previous_refill {
            return None;
        }
    }

    let capacity = bandwidth.capacity as f64;
    let mut new_size = tokens;
    let mut elapsed = now - previous_refill;

    if elapsed >= period {
        let elapsed_periods = elapsed / period;
        new_size += elapsed_periods as f64 * bandwidth.refill_tokens as f64;
        if new_size >= capacity {
            return Some((capacity, now));
        }
        elapsed %= period;
    }

    // multiplying first keeps integral refills exact
    new_size += elapsed as f64 * bandwidth.refill_tokens as f64 / period as f64;
    Some((new_size.min(capacity), now))
}

/// Smallest delay for which `covered` holds, searched outward from `estimate`.
///
/// `covered` must be monotonic in the delay.
fn earliest_covering(estimate: u64, covered: impl Fn(u64) -> bool) -> u64 {
    let mut high = estimate;
    let mut step: u64 = 1;
    while !covered(high) {
        if high == u64::MAX {
            return u64::MAX;
        }
        high = high.saturating_add(step);
        step = step.saturating_mul(2);
    }

    let mut step: u64 = 1;
    let mut low = loop {
        if high == 0 {
            return 0;
        }
        let candidate = high.saturating_sub(step);
        if !covered(candidate) {
            break candidate;
        }
        high = candidate;
        step = step.saturating_mul(2);
    };

    while high - low > 1 {
        let middle = low + (high - low) / 2;
        if covered(middle) {
            high = middle;
        } else {
            low = middle;
        }
    }
    high
}

fn saturating_nanos(nanos: f64) -> u64 {
    if nanos >= u64::MAX as f64 {
        u64::MAX
    } else {
        nanos as u64
    }
}

impl fmt::Display for BucketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BucketState{{tokens={:?}, last_refill_time_nanos={:?}}}",
            self.tokens, self.last_refill_time_nanos
        )
    }
}
