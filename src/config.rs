//! Replication configuration
//!
//! Loaded from a JSON file. Every field is optional and falls back to its
//! default; the loaded value is validated before use.
//!
//! ```json
//! {
//!   "mode": "sync",
//!   "remote_timeout_ms": 15000,
//!   "lock_stripes": 64,
//!   "encode_messages": true
//! }
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::Durability;
use crate::errors::{CacheError, CacheResult};

/// Write-path configuration of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Default durability of cache writes: "sync" or "async"
    #[serde(default = "default_mode")]
    pub mode: Durability,

    /// Bound on waiting for acknowledgments, and on each topology wait of
    /// a retry
    #[serde(default = "default_remote_timeout_ms")]
    pub remote_timeout_ms: u64,

    /// Number of primary-side key lock stripes (power of two)
    #[serde(default = "default_lock_stripes")]
    pub lock_stripes: usize,

    /// Serialize every message crossing the in-process network
    #[serde(default = "default_encode_messages")]
    pub encode_messages: bool,
}

fn default_mode() -> Durability {
    Durability::Sync
}
fn default_remote_timeout_ms() -> u64 {
    15_000
}
fn default_lock_stripes() -> usize {
    64
}
fn default_encode_messages() -> bool {
    true
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            remote_timeout_ms: default_remote_timeout_ms(),
            lock_stripes: default_lock_stripes(),
            encode_messages: default_encode_messages(),
        }
    }
}

impl ReplicationConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> CacheResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CacheError::Config(format!("Failed to read config: {}", e)))?;

        let config: ReplicationConfig = serde_json::from_str(&content)
            .map_err(|e| CacheError::Config(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Check field constraints
    pub fn validate(&self) -> CacheResult<()> {
        if self.remote_timeout_ms == 0 {
            return Err(CacheError::Config("remote_timeout_ms must be > 0".to_string()));
        }

        if self.lock_stripes == 0 || !self.lock_stripes.is_power_of_two() {
            return Err(CacheError::Config(format!(
                "Invalid lock_stripes: {}. Must be a power of two.",
                self.lock_stripes
            )));
        }

        Ok(())
    }

    /// Override the acknowledgment timeout
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Override the default durability
    pub fn with_mode(mut self, mode: Durability) -> Self {
        self.mode = mode;
        self
    }

    /// Acknowledgment timeout as a duration
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }
}
