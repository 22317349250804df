//! Lockward configuration.
//!
//! Loaded from a TOML file (JSON is accepted when the file extension is
//! `.json`).  Every field has a default, so an empty file and a missing file
//! both yield a working configuration.
//!
//! ```toml
//! [timeout]
//! check_interval_secs = 10
//! view_suppression = "global"
//! check_on_interval = true
//!
//! [bus]
//! capacity = 256
//!
//! [store]
//! database = "data/lockward.db"
//! cache_capacity = 10000
//! cache_ttl_secs = 3600
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LockError, Result};

/// How the "a vault view is open" signal suppresses timeout checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewSuppression {
    /// An open view skips the whole tick.
    #[default]
    Global,
    /// An open view only protects the active account.
    ActiveAccount,
    /// The view signal is ignored.
    Disabled,
}

/// `[timeout]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Seconds between timeout checks.
    pub check_interval_secs: u64,
    pub view_suppression: ViewSuppression,
    /// Start the recurring check on `init`.
    pub check_on_interval: bool,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: 10,
            view_suppression: ViewSuppression::Global,
            check_on_interval: true,
        }
    }
}

impl TimeoutSettings {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

/// `[bus]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub capacity: usize,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

/// `[store]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub database: PathBuf,
    /// Maximum decrypted entries held per cache.
    pub cache_capacity: u64,
    pub cache_ttl_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            database: PathBuf::from("data/lockward.db"),
            cache_capacity: 10_000,
            cache_ttl_secs: 3600,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockwardConfig {
    pub timeout: TimeoutSettings,
    pub bus: BusSettings,
    pub store: StoreSettings,
}

impl LockwardConfig {
    /// Load configuration from `path`.
    ///
    /// A missing file yields the defaults; a file that exists but does not
    /// parse is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(LockError::Config {
                    reason: format!("failed to read {}: {e}", path.display()),
                });
            }
        };

        let config = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str::<Self>(&raw).map_err(|e| LockError::Config {
                reason: format!("failed to parse {}: {e}", path.display()),
            })?
        } else {
            Self::from_toml(&raw)?
        };

        config.validate()?;
        tracing::info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| LockError::Config {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.timeout.check_interval_secs == 0 {
            return Err(LockError::Config {
                reason: "timeout.check_interval_secs must be greater than zero".into(),
            });
        }
        if self.bus.capacity == 0 {
            return Err(LockError::Config {
                reason: "bus.capacity must be greater than zero".into(),
            });
        }
        Ok(())
    }
}
