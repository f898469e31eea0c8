use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// BackoffConfig
// ---------------------------------------------------------------------------

/// Retry delay after a failed attempt: `min(base * 2^(attempts - 1), max)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_base_secs")]
    pub base_secs: u64,
    #[serde(default = "default_max_secs")]
    pub max_secs: u64,
}

fn default_base_secs() -> u64 {
    30
}

fn default_max_secs() -> u64 {
    3600
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_secs: default_base_secs(),
            max_secs: default_max_secs(),
        }
    }
}

impl BackoffConfig {
    /// Delay in milliseconds before the next attempt, given the number of
    /// failed attempts so far (the first failure is `attempts = 1`).
    pub fn delay_ms(&self, attempts: u32) -> i64 {
        if attempts == 0 {
            return 0;
        }
        let base_ms = self.base_secs.saturating_mul(1000);
        let max_ms = self.max_secs.saturating_mul(1000);
        let shift = (attempts - 1).min(32);
        let delay = base_ms.saturating_mul(1u64 << shift).min(max_ms);
        i64::try_from(delay).unwrap_or(i64::MAX)
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// Bound on each dry-run quote.
    #[serde(default = "default_quote_timeout")]
    pub quote_timeout_secs: u64,
    /// Bound on waiting for a `seq` step's confirmation.
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,
    /// An `executing` state older than this is considered stranded by a crash.
    #[serde(default = "default_recovery_max_age")]
    pub recovery_max_age_secs: u64,
}

fn default_quote_timeout() -> u64 {
    15
}

fn default_confirmation_timeout() -> u64 {
    120
}

fn default_recovery_max_age() -> u64 {
    600
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            quote_timeout_secs: default_quote_timeout(),
            confirmation_timeout_secs: default_confirmation_timeout(),
            recovery_max_age_secs: default_recovery_max_age(),
        }
    }
}

impl EngineConfig {
    pub fn quote_timeout(&self) -> Duration {
        Duration::from_secs(self.quote_timeout_secs)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn recovery_max_age(&self) -> Duration {
        Duration::from_secs(self.recovery_max_age_secs)
    }

    /// Load `.action-queue/config.yaml` under `root`; a missing file yields
    /// the defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let config: EngineConfig = serde_yaml::from_str(&data)?;
        Ok(config)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
