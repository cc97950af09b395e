//! Guard configuration and filesystem locations.
//!
//! Everything is optional: a missing file yields defaults, a missing key
//! yields that key's default. A file that exists but does not parse is an
//! error, since silently guarding with the wrong threshold is worse than not
//! starting.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::buffer::BUFFER_CAPACITY;
use crate::error::{GuardError, Result};

const GUARD_DIR_NAME: &str = ".sandbox-guard";
const CONFIG_FILE_NAME: &str = "guard.toml";
const LOG_DIR_NAME: &str = "logs";

/// Longest accepted poll interval, in seconds.
pub const MAX_POLL_INTERVAL: f64 = 3600.0;

fn default_poll_interval() -> f64 {
    0.4
}

fn default_min_samples() -> usize {
    8
}

fn default_kill_threshold() -> f64 {
    0.85
}

/// Tuning shared read-only by every watcher of one supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Seconds between samples.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: f64,
    /// Samples required before the classifier is consulted.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// Minimum confidence of a `malicious` verdict that warrants a kill.
    #[serde(default = "default_kill_threshold")]
    pub kill_threshold: f64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            min_samples: default_min_samples(),
            kill_threshold: default_kill_threshold(),
        }
    }
}

impl GuardConfig {
    /// Poll interval as a `Duration`. Values `validate` would reject fall
    /// back to the default interval.
    pub fn poll_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.poll_interval)
            .ok()
            .filter(|poll| !poll.is_zero() && poll.as_secs_f64() <= MAX_POLL_INTERVAL)
            .unwrap_or_else(|| Duration::from_secs_f64(default_poll_interval()))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.poll_interval > 0.0 && self.poll_interval <= MAX_POLL_INTERVAL) {
            return Err(GuardError::ConfigInvalid(format!(
                "poll_interval must be within (0, {}] seconds, got {}",
                MAX_POLL_INTERVAL, self.poll_interval
            )));
        }
        if self.min_samples == 0 || self.min_samples > BUFFER_CAPACITY {
            return Err(GuardError::ConfigInvalid(format!(
                "min_samples must be between 1 and {}, got {}",
                BUFFER_CAPACITY, self.min_samples
            )));
        }
        if !(0.0..=1.0).contains(&self.kill_threshold) {
            return Err(GuardError::ConfigInvalid(format!(
                "kill_threshold must be within [0, 1], got {}",
                self.kill_threshold
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub model: Option<PathBuf>,
}

/// Layout of `guard.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GuardFileConfig {
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

impl GuardFileConfig {
    pub fn log_dir(&self) -> Result<PathBuf> {
        match &self.paths.log_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_log_dir(),
        }
    }
}

/// Loads and validates the guard configuration.
///
/// `None` reads the default location under the home directory.
pub fn load_config(path: Option<PathBuf>) -> Result<GuardFileConfig> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "No guard config found; using defaults");
        return Ok(GuardFileConfig::default());
    }

    let config = parse_config_file(&config_path)?;
    config.guard.validate()?;
    Ok(config)
}

fn parse_config_file(path: &Path) -> Result<GuardFileConfig> {
    let content = fs_err::read_to_string(path)
        .map_err(|err| GuardError::io(format!("reading {}", path.display()), err))?;
    toml::from_str::<GuardFileConfig>(&content).map_err(|err| GuardError::ConfigMalformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}

/// Returns `~/.sandbox-guard`.
pub fn guard_home() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(GUARD_DIR_NAME))
        .ok_or(GuardError::HomeDirNotFound)
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(guard_home()?.join(CONFIG_FILE_NAME))
}

pub fn default_log_dir() -> Result<PathBuf> {
    Ok(guard_home()?.join(LOG_DIR_NAME))
}
