use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default sampling interval for the internal disk
pub const DEFAULT_DISK_INTERVAL_SECS: u64 = 60;

/// Default sampling interval for external disks
pub const DEFAULT_EXTERNAL_INTERVAL_SECS: u64 = 300;

/// Collector configuration, loaded from TOML and overridden by CLI flags
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub output: OutputConfig,
    pub sampling: SamplingConfig,
    pub commands: CommandConfig,
    pub logs: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving the daily CSV files; a leading `~/` is expanded
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("~/disk_logs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Seconds between passes; `None` picks the per-mode default
    pub interval_seconds: Option<u64>,
    /// Mount path whose backing disk is sampled in disk mode
    pub root_mount: String,
    /// Directory holding user-visible mount points
    pub mount_root: PathBuf,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: None,
            root_mount: "/".to_string(),
            mount_root: PathBuf::from("/Volumes"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Per-command timeout; 0 disables it
    pub timeout_seconds: u64,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 120,
        }
    }
}

impl CommandConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_seconds > 0).then(|| Duration::from_secs(self.timeout_seconds))
    }
}

/// Bounds for the system log window and for classification samples
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub min_window_seconds: u64,
    pub max_window_seconds: u64,
    pub max_lines: usize,
    pub samples_per_category: usize,
    pub sample_max_chars: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            min_window_seconds: 10,
            max_window_seconds: 3600,
            max_lines: 5000,
            samples_per_category: 5,
            sample_max_chars: 220,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// `ConfigError::ReadError` when the file cannot be read, `TomlError` when
    /// it is not valid TOML, `ValidationError` when values are out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampling.interval_seconds == Some(0) {
            return Err(ConfigError::ValidationError(
                "sampling.interval_seconds must be greater than 0".to_string(),
            ));
        }
        if self.logs.min_window_seconds > self.logs.max_window_seconds {
            return Err(ConfigError::ValidationError(format!(
                "logs.min_window_seconds ({}) exceeds logs.max_window_seconds ({})",
                self.logs.min_window_seconds, self.logs.max_window_seconds
            )));
        }
        if self.logs.max_lines == 0 {
            return Err(ConfigError::ValidationError(
                "logs.max_lines must be greater than 0".to_string(),
            ));
        }
        if self.logs.samples_per_category == 0 {
            return Err(ConfigError::ValidationError(
                "logs.samples_per_category must be greater than 0".to_string(),
            ));
        }
        if self.logs.sample_max_chars == 0 {
            return Err(ConfigError::ValidationError(
                "logs.sample_max_chars must be greater than 0".to_string(),
            ));
        }
        if self.sampling.root_mount.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "sampling.root_mount must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Interval in effect, falling back to the mode's default
    pub fn interval_seconds(&self, external: bool) -> u64 {
        self.sampling.interval_seconds.unwrap_or(if external {
            DEFAULT_EXTERNAL_INTERVAL_SECS
        } else {
            DEFAULT_DISK_INTERVAL_SECS
        })
    }

    /// Output directory with `~` expanded against `$HOME`
    pub fn output_dir(&self) -> PathBuf {
        expand_home(&self.output.dir, std::env::var_os("HOME").map(PathBuf::from))
    }
}

fn expand_home(path: &Path, home: Option<PathBuf>) -> PathBuf {
    match (path.strip_prefix("~"), home) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
