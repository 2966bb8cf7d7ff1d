//! Bot configuration
//!
//! Loaded from `config/bot.yaml`. A missing or unreadable file falls back to
//! defaults so a fresh checkout runs with only `DISCORD_TOKEN` set.

use crate::audit::ReconcileSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Default location of the configuration file
pub const CONFIG_FILE: &str = "config/bot.yaml";

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// SQLite file holding case tables and guild settings
    pub database_path: PathBuf,
    /// How many recent audit entries are fetched and cached per action
    pub snapshot_size: u8,
    /// Polls per trigger before giving up on a lagging audit log
    pub retry_attempts: u32,
    /// Seconds to wait between polls
    pub retry_interval_secs: u64,
    /// Prefix for text commands
    pub command_prefix: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/cases.db"),
            snapshot_size: 5,
            retry_attempts: 5,
            retry_interval_secs: 3,
            command_prefix: "`".to_string(),
        }
    }
}

impl BotConfig {
    /// Load from the default config file
    pub async fn load() -> Self {
        Self::load_from(Path::new(CONFIG_FILE)).await
    }

    /// Load from `path`, falling back to defaults
    pub async fn load_from(path: &Path) -> Self {
        let Ok(content) = tokio::fs::read_to_string(path).await else {
            return Self::default();
        };

        match serde_yaml::from_str::<Self>(&content) {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring invalid config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Reconciliation parameters derived from this config
    #[must_use]
    pub fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            snapshot_size: self.snapshot_size.max(1),
            retry_attempts: self.retry_attempts.max(1),
            retry_interval: Duration::from_secs(self.retry_interval_secs),
        }
    }
}
