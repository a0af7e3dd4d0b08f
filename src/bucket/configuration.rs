//! Bucket configuration and construction.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::bandwidth::{check_bandwidths, Bandwidth};
use super::local::{Bucket, LocalBucket};
use super::sync::{LockFreeCell, LockedCell, StateCell, SynchronizationStrategy, UnsynchronizedCell};
use super::time::{SystemMillis, TimeMeter};
use crate::error::{BucketError, Result};

/// Immutable configuration shared by every bucket built from it.
///
/// Cloning is cheap; clones share the bandwidth list and time meter.
#[derive(Clone)]
pub struct BucketConfiguration {
    bandwidths: Arc<[Bandwidth]>,
    time_meter: Arc<dyn TimeMeter>,
    raise_error_when_consume_greater_than_smallest_bandwidth: bool,
}

impl BucketConfiguration {
    /// Validate and assemble a configuration.
    pub fn new(
        bandwidths: Vec<Bandwidth>,
        time_meter: Arc<dyn TimeMeter>,
        raise_error_when_consume_greater_than_smallest_bandwidth: bool,
    ) -> Result<Self> {
        check_bandwidths(&bandwidths)?;
        for (index, bandwidth) in bandwidths.iter().enumerate() {
            if bandwidth.is_intervally_aligned() && !time_meter.is_wall_clock_based() {
                return Err(BucketError::AlignedRefillRequiresWallClock { index });
            }
        }

        Ok(Self {
            bandwidths: bandwidths.into(),
            time_meter,
            raise_error_when_consume_greater_than_smallest_bandwidth,
        })
    }

    pub fn bandwidths(&self) -> &[Bandwidth] {
        &self.bandwidths
    }

    pub fn time_meter(&self) -> &Arc<dyn TimeMeter> {
        &self.time_meter
    }

    pub fn raise_error_when_consume_greater_than_smallest_bandwidth(&self) -> bool {
        self.raise_error_when_consume_greater_than_smallest_bandwidth
    }

    /// Capacity of the smallest bandwidth.
    pub fn smallest_capacity(&self) -> u64 {
        self.bandwidths
            .iter()
            .map(|bandwidth| bandwidth.capacity)
            .min()
            .unwrap_or(0)
    }

    /// Check an amount of tokens a caller wants to consume.
    ///
    /// Oversized requests are only an error when the strict flag is set;
    /// otherwise they pass validation and are simply never granted.
    pub fn check_tokens_to_consume(&self, tokens: u64) -> Result<()> {
        if tokens == 0 {
            return Err(BucketError::NonPositiveAmount);
        }
        let capacity = self.smallest_capacity();
        if self.raise_error_when_consume_greater_than_smallest_bandwidth && tokens > capacity {
            return Err(BucketError::ExceedsCapacity {
                requested: tokens,
                capacity,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for BucketConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketConfiguration")
            .field("bandwidths", &self.bandwidths)
            .field("time_meter", &self.time_meter)
            .field(
                "raise_error_when_consume_greater_than_smallest_bandwidth",
                &self.raise_error_when_consume_greater_than_smallest_bandwidth,
            )
            .finish()
    }
}

/// Builder for local buckets.
#[derive(Debug)]
pub struct BucketBuilder {
    bandwidths: Vec<Bandwidth>,
    time_meter: Arc<dyn TimeMeter>,
    synchronization: SynchronizationStrategy,
    strict_capacity: bool,
}

impl Default for BucketBuilder {
    fn default() -> Self {
        Self {
            bandwidths: Vec::new(),
            time_meter: Arc::new(SystemMillis),
            synchronization: SynchronizationStrategy::default(),
            strict_capacity: false,
        }
    }
}

impl BucketBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one more limit.
    pub fn add_limit(mut self, bandwidth: Bandwidth) -> Self {
        self.bandwidths.push(bandwidth);
        self
    }

    pub fn with_time_meter(mut self, time_meter: Arc<dyn TimeMeter>) -> Self {
        self.time_meter = time_meter;
        self
    }

    pub fn with_synchronization(mut self, synchronization: SynchronizationStrategy) -> Self {
        self.synchronization = synchronization;
        self
    }

    /// Make requests larger than the smallest capacity an error instead of a denial.
    pub fn raise_error_when_consume_greater_than_smallest_bandwidth(mut self, strict: bool) -> Self {
        self.strict_capacity = strict;
        self
    }

    /// Validate and produce the configuration without building a bucket.
    pub fn build_configuration(self) -> Result<BucketConfiguration> {
        BucketConfiguration::new(self.bandwidths, self.time_meter, self.strict_capacity)
    }

    /// Build a bucket with the configured synchronization strategy.
    pub fn build(self) -> Result<Box<dyn Bucket>> {
        let synchronization = self.synchronization;
        let configuration = self.build_configuration()?;
        debug!(
            bandwidths = configuration.bandwidths().len(),
            synchronization = ?synchronization,
            "Building local bucket"
        );

        Ok(match synchronization {
            SynchronizationStrategy::LockFree => Box::new(LocalBucket::<LockFreeCell>::new(configuration)),
            SynchronizationStrategy::Synchronized => Box::new(LocalBucket::<LockedCell>::new(configuration)),
            SynchronizationStrategy::None => Box::new(LocalBucket::<UnsynchronizedCell>::new(configuration)),
        })
    }

    /// Build a bucket with a statically chosen state cell.
    pub fn build_with<C: StateCell>(self) -> Result<LocalBucket<C>> {
        Ok(LocalBucket::new(self.build_configuration()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::time::ManualTimeMeter;
    use std::time::Duration;

    fn limit() -> Bandwidth {
        Bandwidth::simple(10, Duration::from_secs(1))
    }

    #[test]
    fn test_builder_requires_bandwidth() {
        let result = BucketBuilder::new().build();
        assert!(matches!(result, Err(BucketError::NoBandwidths)));
    }

    #[test]
    fn test_aligned_refill_requires_wall_clock() {
        let aligned = limit().intervally_aligned(0);

        let result = BucketBuilder::new()
            .add_limit(limit())
            .add_limit(aligned)
            .with_time_meter(Arc::new(ManualTimeMeter::new(0)))
            .build_configuration();
        assert!(matches!(result, Err(BucketError::AlignedRefillRequiresWallClock { index: 1 })));

        let result = BucketBuilder::new()
            .add_limit(aligned)
            .with_time_meter(Arc::new(ManualTimeMeter::wall_clock(0)))
            .build_configuration();
        assert!(result.is_ok());
    }

    #[test]
    fn test_interval_refill_allowed_with_any_clock() {
        let result = BucketBuilder::new()
            .add_limit(limit().intervally())
            .with_time_meter(Arc::new(ManualTimeMeter::new(0)))
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_check_tokens_to_consume() {
        let lenient = BucketBuilder::new()
            .add_limit(limit())
            .add_limit(Bandwidth::simple(3, Duration::from_secs(1)))
            .build_configuration()
            .unwrap();
        assert_eq!(lenient.smallest_capacity(), 3);
        assert!(matches!(lenient.check_tokens_to_consume(0), Err(BucketError::NonPositiveAmount)));
        assert!(lenient.check_tokens_to_consume(4).is_ok());

        let strict = BucketBuilder::new()
            .add_limit(Bandwidth::simple(3, Duration::from_secs(1)))
            .raise_error_when_consume_greater_than_smallest_bandwidth(true)
            .build_configuration()
            .unwrap();
        assert!(strict.check_tokens_to_consume(3).is_ok());
        assert!(matches!(
            strict.check_tokens_to_consume(4),
            Err(BucketError::ExceedsCapacity { requested: 4, capacity: 3 })
        ));
    }
}
