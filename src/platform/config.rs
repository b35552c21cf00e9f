//! `skein.toml` config loading.

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Base directory for run artifacts (reports).
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Default reporter for CLI commands.
    #[serde(default = "default_reporter")]
    pub reporter: crate::Reporter,

    /// Default assertion poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Default assertion deadline in milliseconds.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,

    /// Per-call timeout for node/service HTTP requests, in milliseconds.
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    /// Per-block budget for `wait_blocks`, in milliseconds. The waiter's
    /// deadline is `blocks * block_budget_ms`.
    #[serde(default = "default_block_budget_ms")]
    pub block_budget_ms: u64,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".skein")
}

fn default_reporter() -> crate::Reporter {
    crate::Reporter::Pretty
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_max_wait_ms() -> u64 {
    120_000
}

fn default_http_timeout_ms() -> u64 {
    30_000
}

fn default_block_budget_ms() -> u64 {
    30_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            reporter: default_reporter(),
            poll_interval_ms: default_poll_interval_ms(),
            max_wait_ms: default_max_wait_ms(),
            http_timeout_ms: default_http_timeout_ms(),
            block_budget_ms: default_block_budget_ms(),
        }
    }
}

impl Config {
    pub fn load_optional(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => match toml::from_str::<Config>(&s) {
                Ok(cfg) => cfg,
                Err(err) => {
                    tracing::warn!("failed to parse config {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("failed to read config {}: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.base_dir.join("runs")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn block_budget(&self) -> Duration {
        Duration::from_millis(self.block_budget_ms)
    }
}
