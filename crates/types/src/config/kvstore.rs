//! Per-shard configuration handed to a persistence backend.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ConfigError, KvConfig};

/// Configuration for one persistence shard.
///
/// Derived from [`KvConfig`] plus the shard id; the flusher consults
/// `fsync_after_every_n_bytes_written` for its batch boundaries and may
/// update it at runtime via [`set_periodic_sync_bytes`](Self::set_periodic_sync_bytes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct KvStoreConfig {
    /// Number of partitions in the bucket.
    pub max_vbuckets: u16,
    /// Total shard count.
    pub max_shards: u16,
    /// This shard's index, in `0..max_shards`.
    pub shard_id: u16,
    /// Persistence collaborator selector.
    pub backend: String,
    /// Whether collection namespaces are written to disk.
    #[serde(default)]
    pub persist_doc_namespace: bool,
    /// Flusher issues an fsync after this many bytes (0 = only at commit).
    #[serde(default)]
    pub fsync_after_every_n_bytes_written: u64,
}

#[bon::bon]
impl KvStoreConfig {
    /// Creates a shard configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `shard_id` is out of range
    /// or a count is zero.
    #[builder]
    pub fn new(
        max_vbuckets: u16,
        max_shards: u16,
        shard_id: u16,
        #[builder(into)] backend: String,
        #[builder(default)] persist_doc_namespace: bool,
        #[builder(default)] fsync_after_every_n_bytes_written: u64,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            max_vbuckets,
            max_shards,
            shard_id,
            backend,
            persist_doc_namespace,
            fsync_after_every_n_bytes_written,
        };
        config.validate()?;
        Ok(config)
    }
}

impl KvStoreConfig {
    /// Derives the shard configuration from the engine configuration.
    pub fn from_config(config: &KvConfig, shard_id: u16) -> Self {
        Self {
            max_vbuckets: config.max_vbuckets,
            max_shards: config.max_num_shards,
            shard_id,
            backend: config.backend.clone(),
            persist_doc_namespace: config.collections_prototype_enabled,
            fsync_after_every_n_bytes_written: 0,
        }
    }

    /// Validates counts and shard range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_vbuckets == 0 {
            return Err(ConfigError::Validation {
                message: "max_vbuckets must be >= 1".to_string(),
            });
        }
        if self.max_shards == 0 {
            return Err(ConfigError::Validation {
                message: "max_shards must be >= 1".to_string(),
            });
        }
        if self.shard_id >= self.max_shards {
            return Err(ConfigError::Validation {
                message: format!(
                    "shard_id ({}) must be < max_shards ({})",
                    self.shard_id, self.max_shards
                ),
            });
        }
        Ok(())
    }

    /// Updates the flusher's periodic sync boundary at runtime.
    pub fn set_periodic_sync_bytes(&mut self, bytes: u64) {
        self.fsync_after_every_n_bytes_written = bytes;
    }
}
