//! Engine configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, SyncError};

/// Tunables of the synchronization engine. All fields have conservative
/// defaults; a TOML fragment may override any of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Mutations per checkpointed chunk. A crash loses at most one
    /// uncommitted chunk.
    pub chunk_size: usize,

    /// Collapse a CREATED/UPDATED event into the immediately preceding
    /// CREATED event when both carry the same name and an overlapping parent
    /// set. Works around repositories that emit one event per version on
    /// creation. Vendor-specific; disable for repositories with clean logs.
    pub collapse_version_events: bool,

    /// Content type assigned to documents when the remote type, the
    /// name-based guess and the previously stored type are all absent.
    pub default_content_type: String,

    /// Consumer backoff while the traversal queue is transiently empty but
    /// folder readers are still running.
    #[serde(with = "poll_millis")]
    pub traversal_poll: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: 20,
            collapse_version_events: true,
            default_content_type: "application/octet-stream".to_string(),
            traversal_poll: Duration::from_millis(50),
        }
    }
}

impl SyncConfig {
    /// Parse a TOML fragment, falling back to defaults for absent fields.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(SyncError::Config("chunk_size must be at least 1".into()));
        }
        Ok(())
    }
}

mod poll_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(de)?;
        Ok(Duration::from_millis(millis))
    }
}
