use anyhow::{Context, Result};
use dotenv::dotenv;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::common::{DEFAULT_FIX_TTR_SECS, DEFAULT_FLUX_TTR_SECS};

/// Process-wide settings, read once at startup from `VITRINE_*` variables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Selects the member of per-environment scheme bases (`development`, `production`, ...)
    pub environment: String,
    /// redb file holding media and version rows
    pub db_path: PathBuf,
    /// Base of the `file` scheme; originals and versions live below it
    pub object_root: PathBuf,
    /// Scratch space for downloads of remote sources
    pub temp_root: PathBuf,
    /// Extra assembly recipes (JSON) merged over the built-in set
    pub assembly_path: Option<PathBuf>,
    /// Extra scheme capabilities (JSON) merged over the built-in set
    pub scheme_path: Option<PathBuf>,
    pub fix_workers: usize,
    pub flux_workers: usize,
    pub fix_ttr_secs: u64,
    pub flux_ttr_secs: u64,
    /// Attempts made when the queue connection drops during enqueue
    pub enqueue_retries: u32,
    pub enqueue_retry_delay_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            db_path: PathBuf::from("./db/vitrine.redb"),
            object_root: PathBuf::from("./object"),
            temp_root: PathBuf::from("./tmp"),
            assembly_path: None,
            scheme_path: None,
            fix_workers: 2,
            flux_workers: 1,
            fix_ttr_secs: DEFAULT_FIX_TTR_SECS,
            flux_ttr_secs: DEFAULT_FLUX_TTR_SECS,
            enqueue_retries: 3,
            enqueue_retry_delay_ms: 100,
        }
    }
}

impl AppConfig {
    /// Read `.env` (if any) and the `VITRINE_` environment.
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        let config = envy::prefixed("VITRINE_")
            .from_env::<AppConfig>()
            .context("failed to read VITRINE_* configuration from environment")?;
        info!(
            "Configuration loaded (environment: {}, object root: {:?})",
            config.environment, config.object_root
        );
        Ok(config)
    }

    pub fn fix_ttr(&self) -> Duration {
        Duration::from_secs(self.fix_ttr_secs)
    }

    pub fn flux_ttr(&self) -> Duration {
        Duration::from_secs(self.flux_ttr_secs)
    }

    pub fn enqueue_retry_delay(&self) -> Duration {
        Duration::from_millis(self.enqueue_retry_delay_ms)
    }

    /// Configuration rooted in `root`, used by tests and one-off tools.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            db_path: root.join("db").join("vitrine.redb"),
            object_root: root.join("object"),
            temp_root: root.join("tmp"),
            ..Self::default()
        }
    }
}
