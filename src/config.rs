use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Expand tilde (~) in path to user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(s) = path.to_str() {
        if let Some(stripped) = s.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        } else if s == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

/// Configuration for git-casefile
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CasefileConfig {
    /// Ref holding the shared casefile tree, locally and on every remote
    #[serde(default = "defaults::shared_ref")]
    pub shared_ref: String,
    /// Git executable to invoke
    #[serde(default = "defaults::git_program")]
    pub git_program: PathBuf,
    /// How many reachability checks run at once
    #[serde(default = "defaults::fan_out")]
    pub fan_out: usize,
    /// Lines searched above and below the expected line for mark text
    #[serde(default = "defaults::search_radius")]
    pub search_radius: usize,
    /// Delay before a pending action is reported as locked
    #[serde(default = "defaults::lock_grace_ms")]
    pub lock_grace_ms: u64,
    /// Longest mark text kept from a source line
    #[serde(default = "defaults::mark_text_limit")]
    pub mark_text_limit: usize,
}

impl Default for CasefileConfig {
    fn default() -> Self {
        Self {
            shared_ref: defaults::shared_ref(),
            git_program: defaults::git_program(),
            fan_out: defaults::fan_out(),
            search_radius: defaults::search_radius(),
            lock_grace_ms: defaults::lock_grace_ms(),
            mark_text_limit: defaults::mark_text_limit(),
        }
    }
}

impl CasefileConfig {
    /// Load configuration from the config file (if any) and environment variables
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;
        tracing::debug!("loading git-casefile config from {:?}", config_path);
        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `GIT_CASEFILE_*` overrides looked up through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(shared_ref) = lookup("GIT_CASEFILE_REF") {
            self.shared_ref = shared_ref;
        }

        if let Some(program) = lookup("GIT_CASEFILE_GIT") {
            self.git_program = expand_tilde(&PathBuf::from(program));
        }

        if let Some(fan_out) = lookup("GIT_CASEFILE_FAN_OUT") {
            self.fan_out = fan_out
                .parse()
                .context("Failed to parse GIT_CASEFILE_FAN_OUT as usize")?;
        }

        if let Some(radius) = lookup("GIT_CASEFILE_SEARCH_RADIUS") {
            self.search_radius = radius
                .parse()
                .context("Failed to parse GIT_CASEFILE_SEARCH_RADIUS as usize")?;
        }

        if let Some(grace) = lookup("GIT_CASEFILE_LOCK_GRACE_MS") {
            self.lock_grace_ms = grace
                .parse()
                .context("Failed to parse GIT_CASEFILE_LOCK_GRACE_MS as u64")?;
        }

        if self.fan_out == 0 {
            anyhow::bail!("fan_out must be at least 1");
        }
        Ok(())
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: CasefileConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.git_program = expand_tilde(&config.git_program);

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get default config file path
    pub fn config_file_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".config/git-casefile/config.yaml"))
            .context("Could not determine home directory for config file")
    }

    pub fn lock_grace(&self) -> Duration {
        Duration::from_millis(self.lock_grace_ms)
    }
}

mod defaults {
    use std::path::PathBuf;

    pub(crate) fn shared_ref() -> String {
        "refs/collaboration/shared-casefiles".to_string()
    }

    pub(crate) fn git_program() -> PathBuf {
        PathBuf::from("git")
    }

    pub(crate) fn fan_out() -> usize {
        8
    }

    pub(crate) fn search_radius() -> usize {
        10
    }

    pub(crate) fn lock_grace_ms() -> u64 {
        10
    }

    pub(crate) fn mark_text_limit() -> usize {
        40
    }
}
