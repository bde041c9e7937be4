//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::reactive::MAX_FLUSH_RUNS;

/// What happens to store-bound signals when the global namespace changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespacePolicy {
    /// Re-resolve namespace-dependent signals and move them to their new paths.
    Rebind,
    /// Detach bound signals from the store. Local reads and writes still work.
    Freeze,
    /// Leave every signal on the path it was created with.
    #[default]
    Stale,
}

/// Configuration for a [`SyncEngine`](crate::SyncEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Policy applied to bound signals on login, logout and namespace overrides.
    pub on_namespace_change: NamespacePolicy,

    /// Quiet period after which a collection scan is considered settled
    /// when the store sends no completion marker.
    pub settle_grace_ms: u64,

    /// Upper bound on the duration of a collection scan.
    pub settle_max_ms: u64,

    /// Default for `create_if_missing` in [`SyncEngine::login`](crate::SyncEngine::login).
    pub auto_create_accounts: bool,

    /// Notifications a single write may trigger beyond its own subscribers
    /// before the pass is treated as an effect cycle. Shared by every
    /// engine in the process.
    pub max_flush_runs: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            on_namespace_change: NamespacePolicy::Stale,
            settle_grace_ms: 250,
            settle_max_ms: 5_000,
            auto_create_accounts: false,
            max_flush_runs: MAX_FLUSH_RUNS,
        }
    }
}

impl SyncConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.settle_grace_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "settle_grace_ms",
                reason: "must be > 0",
            });
        }
        if self.settle_max_ms < self.settle_grace_ms {
            return Err(ConfigError::Invalid {
                field: "settle_max_ms",
                reason: "must be >= settle_grace_ms",
            });
        }
        if self.max_flush_runs == 0 {
            return Err(ConfigError::Invalid {
                field: "max_flush_runs",
                reason: "must be > 0",
            });
        }
        Ok(())
    }

    pub fn settle_grace(&self) -> Duration {
        Duration::from_millis(self.settle_grace_ms)
    }

    pub fn settle_max(&self) -> Duration {
        Duration::from_millis(self.settle_max_ms)
    }
}
