//! Bandwidth descriptors.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BucketError, Result};

/// One configured limit of a bucket.
///
/// A bandwidth is pure data: how many tokens it can hold, how fast it refills
/// and whether refill is continuous (greedy) or happens in whole lumps at
/// period boundaries (intervally).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bandwidth {
    /// Maximum number of tokens
    pub capacity: u64,
    /// Duration of one refill cycle in nanoseconds
    pub refill_period_nanos: u64,
    /// Tokens granted per full refill cycle
    pub refill_tokens: u64,
    /// Tokens present when the bucket is created
    pub initial_tokens: u64,
    /// When set, tokens only appear at period boundaries
    pub refill_intervally: bool,
    /// Wall-clock instant (nanos since the Unix epoch) the interval
    /// boundaries are aligned to
    pub time_of_first_refill_nanos: Option<u64>,
}

impl Bandwidth {
    /// Greedy bandwidth refilling `capacity` tokens every `period`.
    pub fn simple(capacity: u64, period: Duration) -> Self {
        Self::classic(capacity, capacity, period)
    }

    /// Greedy bandwidth refilling `refill_tokens` every `period`, starting full.
    pub fn classic(capacity: u64, refill_tokens: u64, period: Duration) -> Self {
        Self {
            capacity,
            refill_period_nanos: duration_to_nanos(period),
            refill_tokens,
            initial_tokens: capacity,
            refill_intervally: false,
            time_of_first_refill_nanos: None,
        }
    }

    /// Override the number of tokens the bucket starts with.
    pub fn with_initial_tokens(mut self, initial_tokens: u64) -> Self {
        self.initial_tokens = initial_tokens;
        self
    }

    /// Switch to interval refill: tokens appear only at period boundaries.
    pub fn intervally(mut self) -> Self {
        self.refill_intervally = true;
        self
    }

    /// Interval refill with boundaries aligned to a wall-clock instant.
    pub fn intervally_aligned(mut self, time_of_first_refill_nanos: u64) -> Self {
        self.refill_intervally = true;
        self.time_of_first_refill_nanos = Some(time_of_first_refill_nanos);
        self
    }

    /// Whether the refill boundaries are pinned to wall-clock time.
    pub fn is_intervally_aligned(&self) -> bool {
        self.time_of_first_refill_nanos.is_some()
    }

    /// Last refill timestamp a fresh bucket should record at `now`.
    ///
    /// For aligned bandwidths this is the latest boundary at or before `now`,
    /// or the boundary one period before the first refill when `now` is earlier.
    pub(crate) fn initial_refill_time(&self, now: u64) -> u64 {
        match self.time_of_first_refill_nanos {
            None => now,
            Some(first) if now >= first => {
                let periods = (now - first) / self.refill_period_nanos;
                first + periods * self.refill_period_nanos
            }
            Some(first) => first.saturating_sub(self.refill_period_nanos),
        }
    }

    /// Check the invariants of a single bandwidth.
    pub fn validate(&self, index: usize) -> Result<()> {
        let invalid = |reason: &str| BucketError::InvalidBandwidth {
            index,
            reason: reason.to_string(),
        };

        if self.capacity == 0 {
            return Err(invalid("capacity must be positive"));
        }
        if self.refill_period_nanos == 0 {
            return Err(invalid("refill period must be positive"));
        }
        if self.refill_tokens == 0 {
            return Err(invalid("refill tokens must be positive"));
        }
        if self.initial_tokens > self.capacity {
            return Err(invalid("initial tokens must not exceed capacity"));
        }
        if self.time_of_first_refill_nanos.is_some() && !self.refill_intervally {
            return Err(invalid("aligned first refill requires interval refill"));
        }
        Ok(())
    }
}

/// Check a whole bandwidth list: non-empty and every entry valid.
pub fn check_bandwidths(bandwidths: &[Bandwidth]) -> Result<()> {
    if bandwidths.is_empty() {
        return Err(BucketError::NoBandwidths);
    }
    for (index, bandwidth) in bandwidths.iter().enumerate() {
        bandwidth.validate(index)?;
    }
    Ok(())
}

fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_bandwidth() {
        let bandwidth = Bandwidth::simple(10, Duration::from_secs(1));
        assert_eq!(bandwidth.capacity, 10);
        assert_eq!(bandwidth.refill_tokens, 10);
        assert_eq!(bandwidth.refill_period_nanos, 1_000_000_000);
        assert_eq!(bandwidth.initial_tokens, 10);
        assert!(!bandwidth.refill_intervally);
    }

    #[test]
    fn test_validation_rejects_zero_parameters() {
        let period = Duration::from_secs(1);
        assert!(Bandwidth::simple(0, period).validate(0).is_err());
        assert!(Bandwidth::classic(10, 0, period).validate(0).is_err());
        assert!(Bandwidth::simple(10, Duration::ZERO).validate(0).is_err());
        assert!(Bandwidth::simple(10, period).with_initial_tokens(11).validate(0).is_err());
        assert!(Bandwidth::simple(10, period).with_initial_tokens(10).validate(0).is_ok());
    }

    #[test]
    fn test_check_bandwidths_reports_index() {
        let good = Bandwidth::simple(10, Duration::from_secs(1));
        let bad = Bandwidth::simple(0, Duration::from_secs(1));

        match check_bandwidths(&[good, bad]) {
            Err(BucketError::InvalidBandwidth { index, .. }) => assert_eq!(index, 1),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(check_bandwidths(&[]), Err(BucketError::NoBandwidths)));
    }

    #[test]
    fn test_initial_refill_time_for_aligned_bandwidth() {
        let bandwidth = Bandwidth::simple(5, Duration::from_nanos(100)).intervally_aligned(1_000);

        assert_eq!(bandwidth.initial_refill_time(1_250), 1_200);
        assert_eq!(bandwidth.initial_refill_time(1_000), 1_000);
        assert_eq!(bandwidth.initial_refill_time(500), 900);

        let plain = Bandwidth::simple(5, Duration::from_nanos(100));
        assert_eq!(plain.initial_refill_time(1_250), 1_250);
    }
}
