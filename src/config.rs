//! Daemon configuration file

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use tailpoll_logs::LogConfig;

/// Default interval between two reports of new items (10 seconds)
const DEFAULT_REPORT_INTERVAL_MS: u64 = 10_000;

/// Top level daemon config, loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// JSON file the seek info of every file source is persisted to
    pub state_file: PathBuf,

    /// How often new items are logged
    pub report_interval_ms: u64,

    /// One log poller per source
    pub sources: Vec<LogConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("tailpoll-state.json"),
            report_interval_ms: DEFAULT_REPORT_INTERVAL_MS,
            sources: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let cfg: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            bail!("no sources configured");
        }

        let mut names = HashSet::new();
        for source in &self.sources {
            let name = source.source_name();
            source
                .validate()
                .with_context(|| format!("invalid source {name:?}"))?;
            if !names.insert(name.clone()) {
                bail!("duplicate source name {name:?}");
            }
        }
        Ok(())
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms.max(1))
    }
}
