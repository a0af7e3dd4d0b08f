//! Declarative bucket settings.
//!
//! Buckets can be described in YAML and turned into a [`BucketBuilder`], a
//! local bucket, or a [`ProxyManager`] for buckets kept in a store.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bucket::{Bandwidth, Bucket, BucketBuilder, SynchronizationStrategy, SystemMillis, SystemNanotime, TimeMeter};
use crate::distributed::{CommandExecutor, OptimizationKind, ProxyManager};
use crate::error::{BucketError, Result};

/// Settings for one kind of bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketSettings {
    /// Limits enforced together
    pub bandwidths: Vec<BandwidthSettings>,

    /// How local buckets guard their state
    #[serde(default)]
    pub synchronization: SynchronizationStrategy,

    /// Clock used to drive refill
    #[serde(default)]
    pub time_meter: TimeMeterKind,

    /// Reject requests larger than the smallest capacity instead of
    /// letting them wait forever
    #[serde(default)]
    pub strict_capacity: bool,

    /// Request optimization for store-backed buckets
    #[serde(default)]
    pub optimization: OptimizationKind,
}

/// Settings for a single bandwidth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthSettings {
    pub capacity: u64,

    /// Defaults to `capacity`
    #[serde(default)]
    pub refill_tokens: Option<u64>,

    pub refill_period_millis: u64,

    /// Defaults to `capacity`
    #[serde(default)]
    pub initial_tokens: Option<u64>,

    #[serde(default)]
    pub refill_mode: RefillMode,

    /// Unix epoch millis the interval boundaries are aligned to
    #[serde(default)]
    pub first_refill_at_millis: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefillMode {
    #[default]
    Greedy,
    Intervally,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeMeterKind {
    /// Wall clock with millisecond resolution
    #[default]
    SystemMillis,
    /// Monotonic clock, not usable with aligned interval refill
    SystemNanotime,
}

impl TimeMeterKind {
    pub fn time_meter(&self) -> Arc<dyn TimeMeter> {
        match self {
            TimeMeterKind::SystemMillis => Arc::new(SystemMillis),
            TimeMeterKind::SystemNanotime => Arc::new(SystemNanotime::new()),
        }
    }
}

impl BandwidthSettings {
    pub fn to_bandwidth(&self) -> Result<Bandwidth> {
        let period = Duration::from_millis(self.refill_period_millis);
        let refill_tokens = self.refill_tokens.unwrap_or(self.capacity);
        let mut bandwidth = Bandwidth::classic(self.capacity, refill_tokens, period)
            .with_initial_tokens(self.initial_tokens.unwrap_or(self.capacity));

        match (self.refill_mode, self.first_refill_at_millis) {
            (RefillMode::Greedy, None) => {}
            (RefillMode::Greedy, Some(_)) => {
                return Err(BucketError::Config(
                    "first_refill_at_millis requires refill_mode: intervally".to_string(),
                ));
            }
            (RefillMode::Intervally, None) => bandwidth = bandwidth.intervally(),
            (RefillMode::Intervally, Some(first)) => {
                let first = first.checked_mul(1_000_000).ok_or_else(|| {
                    BucketError::Config(format!("first_refill_at_millis {} is out of range", first))
                })?;
                bandwidth = bandwidth.intervally_aligned(first);
            }
        }
        Ok(bandwidth)
    }
}

impl BucketSettings {
    /// Load settings from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading bucket settings");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load settings from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| BucketError::Config(format!("Failed to parse bucket settings: {}", e)))
    }

    /// Builder preloaded with these settings.
    pub fn to_builder(&self) -> Result<BucketBuilder> {
        let mut builder = BucketBuilder::new()
            .with_time_meter(self.time_meter.time_meter())
            .with_synchronization(self.synchronization)
            .raise_error_when_consume_greater_than_smallest_bandwidth(self.strict_capacity);
        for bandwidth in &self.bandwidths {
            builder = builder.add_limit(bandwidth.to_bandwidth()?);
        }
        Ok(builder)
    }

    /// Build a local bucket.
    pub fn build(&self) -> Result<Box<dyn Bucket>> {
        self.to_builder()?.build()
    }

    /// Proxies for buckets held by `executor`, optimized as configured.
    ///
    /// The executor's store must use the same bandwidths.
    pub fn proxy_manager(&self, executor: Arc<dyn CommandExecutor>) -> Result<ProxyManager> {
        let configuration = self.to_builder()?.build_configuration()?;
        info!(
            bandwidths = self.bandwidths.len(),
            optimization = ?self.optimization,
            "Creating proxy manager"
        );
        Ok(ProxyManager::with_optimizer(
            configuration,
            executor,
            self.optimization.optimizer().as_ref(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::InMemoryStore;

    #[test]
    fn test_parse_minimal_settings() {
        let yaml = r#"
bandwidths:
  - capacity: 100
    refill_period_millis: 60000
"#;
        let settings = BucketSettings::from_yaml(yaml).unwrap();
        assert_eq!(settings.synchronization, SynchronizationStrategy::LockFree);
        assert_eq!(settings.time_meter, TimeMeterKind::SystemMillis);
        assert_eq!(settings.optimization, OptimizationKind::None);
        assert!(!settings.strict_capacity);

        let bandwidth = settings.bandwidths[0].to_bandwidth().unwrap();
        assert_eq!(bandwidth, Bandwidth::simple(100, Duration::from_secs(60)));
    }

    #[test]
    fn test_parse_full_settings() {
        let yaml = r#"
bandwidths:
  - capacity: 10
    refill_tokens: 1
    refill_period_millis: 1000
    initial_tokens: 0
  - capacity: 1000
    refill_period_millis: 3600000
    refill_mode: intervally
    first_refill_at_millis: 1700000000000
synchronization: synchronized
time_meter: system_millis
strict_capacity: true
optimization: batching
"#;
        let settings = BucketSettings::from_yaml(yaml).unwrap();
        assert_eq!(settings.synchronization, SynchronizationStrategy::Synchronized);
        assert_eq!(settings.optimization, OptimizationKind::Batching);
        assert!(settings.strict_capacity);

        let first = settings.bandwidths[0].to_bandwidth().unwrap();
        assert_eq!(first.refill_tokens, 1);
        assert_eq!(first.initial_tokens, 0);
        assert!(!first.refill_intervally);

        let second = settings.bandwidths[1].to_bandwidth().unwrap();
        assert!(second.refill_intervally);
        assert_eq!(second.time_of_first_refill_nanos, Some(1_700_000_000_000_000_000));
    }

    #[test]
    fn test_reject_invalid_yaml() {
        let result = BucketSettings::from_yaml("bandwidths: nope");
        assert!(matches!(result, Err(BucketError::Config(_))));
    }

    #[test]
    fn test_alignment_requires_interval_mode() {
        let settings = BandwidthSettings {
            capacity: 10,
            refill_tokens: None,
            refill_period_millis: 1000,
            initial_tokens: None,
            refill_mode: RefillMode::Greedy,
            first_refill_at_millis: Some(0),
        };
        assert!(matches!(settings.to_bandwidth(), Err(BucketError::Config(_))));
    }

    #[test]
    fn test_aligned_refill_needs_wall_clock() {
        let yaml = r#"
bandwidths:
  - capacity: 10
    refill_period_millis: 1000
    refill_mode: intervally
    first_refill_at_millis: 0
time_meter: system_nanotime
"#;
        let settings = BucketSettings::from_yaml(yaml).unwrap();
        assert!(matches!(
            settings.build(),
            Err(BucketError::AlignedRefillRequiresWallClock { index: 0 })
        ));
    }

    #[test]
    fn test_build_local_bucket() {
        let yaml = r#"
bandwidths:
  - capacity: 3
    refill_period_millis: 3600000
"#;
        let bucket = BucketSettings::from_yaml(yaml).unwrap().build().unwrap();
        assert!(bucket.try_consume(3).unwrap());
        assert!(!bucket.try_consume(1).unwrap());
    }

    #[test]
    fn test_empty_bandwidths_rejected() {
        let settings = BucketSettings::from_yaml("bandwidths: []").unwrap();
        assert!(matches!(settings.build(), Err(BucketError::NoBandwidths)));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("bucketeer-settings-{}.yaml", std::process::id()));
        std::fs::write(&path, "bandwidths:\n  - capacity: 5\n    refill_period_millis: 1000\n").unwrap();

        let settings = BucketSettings::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(settings.bandwidths[0].capacity, 5);

        let missing = BucketSettings::from_file("/nonexistent/bucketeer.yaml");
        assert!(matches!(missing, Err(BucketError::Io(_))));
    }

    #[tokio::test]
    async fn test_proxy_manager_from_settings() {
        let yaml = r#"
bandwidths:
  - capacity: 2
    refill_period_millis: 3600000
optimization: batching
"#;
        let settings = BucketSettings::from_yaml(yaml).unwrap();
        let configuration = settings.to_builder().unwrap().build_configuration().unwrap();
        let store = Arc::new(InMemoryStore::new(configuration));

        let manager = settings.proxy_manager(store).unwrap();
        let bucket = manager.bucket("tenant");
        assert!(bucket.try_consume(2).await.unwrap());
        assert!(!bucket.try_consume(1).await.unwrap());
    }
}
