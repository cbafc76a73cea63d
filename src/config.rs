//! Configuration discovery for the `pbars` CLI harness.
//!
//! The prediction/sampling core itself takes its tunables as plain
//! constructor arguments (see [`pbars_intake::IntakeConfig`] and
//! [`pbars_predictor::PredictorEngine::with_min_recompute_interval`]); this
//! module only resolves those values from a `pbars.toml`, using a
//! discover-then-validate shape: search upward for a config file, fall
//! back to defaults, then validate before returning.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "pbars.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// §4.D completion grace window before a finished trace's hot-state expires.
    pub completion_grace_seconds: f64,
    /// §4.D bounded retry budget for the `last_updated_at` compare-and-set.
    pub max_cas_attempts: u32,
    /// §4.F minimum interval between full percentile rescans.
    pub min_recompute_interval_seconds: f64,
    /// §4.G idle timeout before a subscription tears itself down.
    pub subscription_idle_timeout_seconds: f64,
    /// Overrides `PBARS_LOG` when set; otherwise logging falls back to the env var.
    pub log_filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            completion_grace_seconds: 300.0,
            max_cas_attempts: 5,
            min_recompute_interval_seconds: 5.0,
            subscription_idle_timeout_seconds: 30.0,
            log_filter: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigSource {
    File,
    Defaults,
}

impl Config {
    /// Searches upward from the current directory for `pbars.toml`, falling
    /// back to defaults when none is found — config is optional, unlike a
    /// missing schema or hot-store connection.
    pub fn discover() -> Result<(Self, ConfigSource)> {
        let cwd = env::current_dir().context("resolving current directory")?;
        match find_upward(&cwd, CONFIG_FILE_NAME) {
            Some(path) => Ok((Self::from_file(&path)?, ConfigSource::File)),
            None => Ok((Self::default(), ConfigSource::Defaults)),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.completion_grace_seconds >= 0.0, "completion_grace_seconds must be >= 0");
        anyhow::ensure!(self.max_cas_attempts >= 1, "max_cas_attempts must be >= 1");
        anyhow::ensure!(
            self.min_recompute_interval_seconds >= 0.0,
            "min_recompute_interval_seconds must be >= 0"
        );
        anyhow::ensure!(
            self.subscription_idle_timeout_seconds > 0.0,
            "subscription_idle_timeout_seconds must be > 0"
        );
        Ok(())
    }
}

fn find_upward(start: &Path, file_name: &str) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(current) = dir {
        let candidate = current.join(file_name);
        if candidate.is_file() {
            return Some(candidate);
        }
        dir = current.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_max_cas_attempts_is_rejected() {
        let mut config = Config::default();
        config.max_cas_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_round_trips_a_written_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "completion_grace_seconds = 120.0\nmax_cas_attempts = 3\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.completion_grace_seconds, 120.0);
        assert_eq!(config.max_cas_attempts, 3);
        assert_eq!(
            config.min_recompute_interval_seconds,
            Config::default().min_recompute_interval_seconds
        );
    }
}
