//! Engine configuration: partition counts, hash-table sizing, quota
//! watermarks, HLC drift thresholds and checkpoint tuning.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::types::BucketType;

fn default_max_vbuckets() -> u16 {
    1024
}

fn default_max_num_shards() -> u16 {
    4
}

fn default_ht_size() -> usize {
    769
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_bucket_type() -> BucketType {
    BucketType::Persistent
}

fn default_exp_pager_interval() -> Duration {
    Duration::from_secs(3600)
}

/// Top-level engine configuration.
///
/// # Validation Rules
///
/// - `max_vbuckets`, `max_num_shards` and `ht_size` must be non-zero
/// - nested sections validate their own constraints
///
/// # Example
///
/// ```no_run
/// # use driftkv_types::config::KvConfig;
/// let config = KvConfig::builder()
///     .max_vbuckets(64)
///     .ht_size(47)
///     .build()
///     .expect("valid engine config");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct KvConfig {
    /// Number of partitions in the bucket.
    #[serde(default = "default_max_vbuckets")]
    pub max_vbuckets: u16,
    /// Shard count for I/O pool striping.
    #[serde(default = "default_max_num_shards")]
    pub max_num_shards: u16,
    /// Hash-table bucket count per partition.
    #[serde(default = "default_ht_size")]
    pub ht_size: usize,
    /// Persistence collaborator selector.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Persistent or ephemeral bucket flavour.
    #[serde(default = "default_bucket_type")]
    pub bucket_type: BucketType,
    /// Whether collection namespaces are written to disk.
    #[serde(default)]
    pub collections_prototype_enabled: bool,
    /// Interval between expiry pager cycles.
    #[serde(default = "default_exp_pager_interval")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub exp_pager_interval: Duration,
    /// Memory quota and watermarks.
    #[serde(default)]
    pub quota: QuotaConfig,
    /// Hybrid logical clock drift thresholds.
    #[serde(default)]
    pub hlc: HlcConfig,
    /// Checkpoint sizing and flush-wait tuning.
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

#[bon::bon]
impl KvConfig {
    /// Creates a new engine configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any count is zero or a
    /// nested section is invalid.
    #[builder]
    pub fn new(
        #[builder(default = default_max_vbuckets())] max_vbuckets: u16,
        #[builder(default = default_max_num_shards())] max_num_shards: u16,
        #[builder(default = default_ht_size())] ht_size: usize,
        #[builder(default = default_backend(), into)] backend: String,
        #[builder(default = default_bucket_type())] bucket_type: BucketType,
        #[builder(default)] collections_prototype_enabled: bool,
        #[builder(default = default_exp_pager_interval())] exp_pager_interval: Duration,
        #[builder(default)] quota: QuotaConfig,
        #[builder(default)] hlc: HlcConfig,
        #[builder(default)] checkpoint: CheckpointConfig,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            max_vbuckets,
            max_num_shards,
            ht_size,
            backend,
            bucket_type,
            collections_prototype_enabled,
            exp_pager_interval,
            quota,
            hlc,
            checkpoint,
        };
        config.validate()?;
        Ok(config)
    }
}

impl KvConfig {
    /// Validates the configuration values.
    ///
    /// Call after deserialization to ensure values are within valid ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_vbuckets == 0 {
            return Err(ConfigError::Validation {
                message: "max_vbuckets must be >= 1".to_string(),
            });
        }
        if self.max_num_shards == 0 {
            return Err(ConfigError::Validation {
                message: "max_num_shards must be >= 1".to_string(),
            });
        }
        if self.ht_size == 0 {
            return Err(ConfigError::Validation { message: "ht_size must be >= 1".to_string() });
        }
        self.quota.validate()?;
        self.hlc.validate()?;
        self.checkpoint.validate()?;
        Ok(())
    }
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            max_vbuckets: default_max_vbuckets(),
            max_num_shards: default_max_num_shards(),
            ht_size: default_ht_size(),
            backend: default_backend(),
            bucket_type: default_bucket_type(),
            collections_prototype_enabled: false,
            exp_pager_interval: default_exp_pager_interval(),
            quota: QuotaConfig::default(),
            hlc: HlcConfig::default(),
            checkpoint: CheckpointConfig::default(),
        }
    }
}

// =========================================================================
// QuotaConfig
// =========================================================================

/// Memory quota and pager watermarks.
///
/// A `max_size` of zero means unlimited. Watermarks left at zero are
/// derived from the quota: low at 75%, high at 85%.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QuotaConfig {
    /// Bucket memory quota in bytes (0 = unlimited).
    #[serde(default)]
    pub max_size: usize,
    /// Low watermark the item pager frees down to (0 = derive).
    #[serde(default)]
    pub mem_low_wat: usize,
    /// High watermark that triggers the item pager (0 = derive).
    #[serde(default)]
    pub mem_high_wat: usize,
}

#[bon::bon]
impl QuotaConfig {
    /// Creates a quota configuration with validation.
    #[builder]
    pub fn new(
        #[builder(default)] max_size: usize,
        #[builder(default)] mem_low_wat: usize,
        #[builder(default)] mem_high_wat: usize,
    ) -> Result<Self, ConfigError> {
        let config = Self { max_size, mem_low_wat, mem_high_wat };
        config.validate()?;
        Ok(config)
    }
}

impl QuotaConfig {
    /// Validates watermark ordering against the quota.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let low = self.low_watermark();
        let high = self.high_watermark();
        if low > high {
            return Err(ConfigError::Validation {
                message: format!("mem_low_wat ({low}) must be <= mem_high_wat ({high})"),
            });
        }
        if self.max_size != 0 && high > self.max_size {
            return Err(ConfigError::Validation {
                message: format!(
                    "mem_high_wat ({high}) must be <= max_size ({})",
                    self.max_size
                ),
            });
        }
        Ok(())
    }

    /// Effective low watermark: explicit value or 75% of the quota.
    pub fn low_watermark(&self) -> usize {
        if self.mem_low_wat != 0 {
            self.mem_low_wat
        } else {
            self.max_size / 4 * 3
        }
    }

    /// Effective high watermark: explicit value or 85% of the quota.
    pub fn high_watermark(&self) -> usize {
        if self.mem_high_wat != 0 {
            self.mem_high_wat
        } else {
            self.max_size / 100 * 85
        }
    }
}

// =========================================================================
// HlcConfig
// =========================================================================

fn default_drift_threshold_us() -> u64 {
    5_000_000
}

/// Hybrid logical clock drift thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct HlcConfig {
    /// Forward skew tolerated before counting an exception, in µs.
    #[serde(default = "default_drift_threshold_us")]
    pub drift_ahead_threshold_us: u64,
    /// Backward skew tolerated before counting an exception, in µs.
    #[serde(default = "default_drift_threshold_us")]
    pub drift_behind_threshold_us: u64,
}

#[bon::bon]
impl HlcConfig {
    /// Creates an HLC configuration with validation.
    #[builder]
    pub fn new(
        #[builder(default = default_drift_threshold_us())] drift_ahead_threshold_us: u64,
        #[builder(default = default_drift_threshold_us())] drift_behind_threshold_us: u64,
    ) -> Result<Self, ConfigError> {
        let config = Self { drift_ahead_threshold_us, drift_behind_threshold_us };
        config.validate()?;
        Ok(config)
    }

    /// Validates that both thresholds are non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.drift_ahead_threshold_us == 0 {
            return Err(ConfigError::Validation {
                message: "hlc_drift_ahead_threshold_us must be >= 1".to_string(),
            });
        }
        if self.drift_behind_threshold_us == 0 {
            return Err(ConfigError::Validation {
                message: "hlc_drift_behind_threshold_us must be >= 1".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for HlcConfig {
    fn default() -> Self {
        Self {
            drift_ahead_threshold_us: default_drift_threshold_us(),
            drift_behind_threshold_us: default_drift_threshold_us(),
        }
    }
}

// =========================================================================
// CheckpointConfig
// =========================================================================

fn default_checkpoint_max_items() -> usize {
    500
}

fn default_flush_timeout_min_secs() -> u64 {
    10
}

fn default_flush_timeout_max_secs() -> u64 {
    30
}

/// Checkpoint sizing and flush-wait tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CheckpointConfig {
    /// Item count at which a checkpoint is considered full.
    #[serde(default = "default_checkpoint_max_items")]
    pub max_items: usize,
    /// Lower bound of the adaptive checkpoint-flush wait, in seconds.
    #[serde(default = "default_flush_timeout_min_secs")]
    pub flush_timeout_min_secs: u64,
    /// Upper bound of the adaptive checkpoint-flush wait, in seconds.
    #[serde(default = "default_flush_timeout_max_secs")]
    pub flush_timeout_max_secs: u64,
}

#[bon::bon]
impl CheckpointConfig {
    /// Creates a checkpoint configuration with validation.
    #[builder]
    pub fn new(
        #[builder(default = default_checkpoint_max_items())] max_items: usize,
        #[builder(default = default_flush_timeout_min_secs())] flush_timeout_min_secs: u64,
        #[builder(default = default_flush_timeout_max_secs())] flush_timeout_max_secs: u64,
    ) -> Result<Self, ConfigError> {
        let config = Self { max_items, flush_timeout_min_secs, flush_timeout_max_secs };
        config.validate()?;
        Ok(config)
    }

    /// Validates item count and timeout ordering.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_items == 0 {
            return Err(ConfigError::Validation {
                message: "checkpoint max_items must be >= 1".to_string(),
            });
        }
        if self.flush_timeout_min_secs > self.flush_timeout_max_secs {
            return Err(ConfigError::Validation {
                message: format!(
                    "flush_timeout_min_secs ({}) must be <= flush_timeout_max_secs ({})",
                    self.flush_timeout_min_secs, self.flush_timeout_max_secs
                ),
            });
        }
        Ok(())
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            max_items: default_checkpoint_max_items(),
            flush_timeout_min_secs: default_flush_timeout_min_secs(),
            flush_timeout_max_secs: default_flush_timeout_max_secs(),
        }
    }
}
