use anyhow::Context;
use clap::Parser;
use diskhealth::collectors::SystemCommandRunner;
use diskhealth::config::{Config, HostContext};
use diskhealth::error::ConfigError;
use diskhealth::records::DeviceId;
use diskhealth::{Sampler, SamplingMode};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Command-line arguments for the disk health collector
#[derive(Parser, Debug)]
#[command(
    name = "diskhealth",
    about = "Disk health telemetry collector - appends SMART and volume samples to daily CSV files",
    long_about = "Samples the internal disk's SMART health log, or the volumes of an external disk \
                  together with storage-related system log events, and appends one row per entity \
                  to day-partitioned CSV files."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    /// Output directory for CSV files
    #[arg(long, value_name = "DIR")]
    out_dir: Option<PathBuf>,

    /// Seconds between passes
    #[arg(long, value_name = "SECONDS")]
    interval: Option<u64>,

    /// Run a single pass and exit
    #[arg(long)]
    once: bool,

    /// Physical disk of an external drive, e.g. disk4
    #[arg(long, value_name = "DEVICE")]
    physical: Option<String>,

    /// Single volume mount path, e.g. /Volumes/Backup
    #[arg(long, value_name = "MOUNT_PATH")]
    volume: Option<String>,

    /// Print the resolved topology to stderr
    #[arg(long)]
    debug: bool,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// # Returns
    ///
    /// `Ok(())` if all arguments are valid, `Err(String)` with error message otherwise
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // Missing files are handled by load_config, which falls back to defaults
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        if self.interval == Some(0) {
            return Err("--interval must be greater than 0".to_string());
        }

        if let Some(ref physical) = self.physical {
            if DeviceId::parse(physical).is_none() {
                return Err(format!(
                    "--physical expects a disk identifier like disk4, got '{}'",
                    physical
                ));
            }
        }

        if let Some(ref volume) = self.volume {
            if volume.trim().is_empty() {
                return Err("--volume must not be empty".to_string());
            }
        }

        Ok(())
    }

    /// Convert config path to string safely, handling non-UTF-8 paths
    fn config_path_str(&self) -> Result<Option<&str>, String> {
        match &self.config {
            Some(path) => match path.to_str() {
                Some(path_str) => Ok(Some(path_str)),
                None => Err(format!(
                    "Configuration file path contains invalid UTF-8 characters: {}",
                    path.display()
                )),
            },
            None => Ok(None),
        }
    }

    /// Select the sampling mode from `--volume` / `--physical`
    fn sampling_mode(&self, root_mount: &str) -> Result<SamplingMode, String> {
        let physical = match &self.physical {
            Some(text) => Some(
                DeviceId::parse(text)
                    .ok_or_else(|| format!("Invalid physical device: {}", text))?,
            ),
            None => None,
        };

        let mode = match (&self.volume, physical) {
            (Some(volume), physical) => SamplingMode::ExternalVolume {
                mount_path: volume.trim().to_string(),
                physical,
            },
            (None, Some(device)) => SamplingMode::ExternalPhysical { device },
            (None, None) => SamplingMode::InternalDisk {
                root_mount: root_mount.to_string(),
            },
        };
        Ok(mode)
    }

    /// Command-line values take precedence over the configuration file
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(ref dir) = self.out_dir {
            config.output.dir = dir.clone();
        }
        if let Some(interval) = self.interval {
            config.sampling.interval_seconds = Some(interval);
        }
    }
}

/// Load configuration from file or use defaults
///
/// A missing or invalid file is reported and replaced by the defaults.
fn load_config(config_path: Option<&str>) -> Config {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            match Config::from_file(std::path::Path::new(path)) {
                Ok(config) => config,
                Err(ConfigError::ReadError(_)) => {
                    warn!(
                        "Configuration file '{}' not found or unreadable, using defaults",
                        path
                    );
                    Config::default()
                }
                Err(e) => {
                    error!("Configuration error in '{}': {}", path, e);
                    warn!("Using default configuration due to invalid config file");
                    Config::default()
                }
            }
        }
        None => {
            info!("Using default configuration");
            Config::default()
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config_path_str().map_err(anyhow::Error::msg)?;
    let mut config = load_config(config_path);
    cli.apply_overrides(&mut config);
    config
        .validate()
        .context("Invalid configuration after applying command-line options")?;

    let mode = cli
        .sampling_mode(&config.sampling.root_mount)
        .map_err(anyhow::Error::msg)?;

    let runner = SystemCommandRunner::new(config.commands.timeout());
    let host = HostContext::detect(&runner);
    info!(
        "Collecting on host '{}' (OS {}) in {} mode",
        host.host,
        host.os_version,
        mode.label()
    );

    let sampler = Sampler::new(&runner, host, config, mode).with_debug(cli.debug);
    sampler.recorder().ensure_writable().with_context(|| {
        format!(
            "Output directory {} is not usable",
            sampler.recorder().out_dir().display()
        )
    })?;

    if cli.once {
        sampler.sample_once().context("Sampling pass failed")?;
        return Ok(());
    }

    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), stopping after the current step");
        flag.store(true, Ordering::SeqCst);
    })
    .context("Error setting SIGINT handler")?;

    info!("Collector is running. Press Ctrl+C to stop.");
    sampler.run(&stop);
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        eprintln!("ERROR: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        eprintln!("ERROR: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["diskhealth"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_cli_validation_with_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_file = dir.path().join("config.toml");
        std::fs::write(&config_file, "[sampling]\ninterval_seconds = 30\n").unwrap();

        let cli = cli(&["--config", config_file.to_str().unwrap()]);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_cli_validation_with_missing_file() {
        let cli = cli(&["--config", "/nonexistent/config.toml"]);

        // Should not fail - missing files are handled gracefully
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_cli_validation_with_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cli = cli(&["--config", dir.path().to_str().unwrap()]);

        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_cli_validation_rejects_zero_interval() {
        assert!(cli(&["--interval", "0"]).validate().is_err());
        assert!(cli(&["--interval", "5"]).validate().is_ok());
    }

    #[test]
    fn test_cli_validation_rejects_bad_physical() {
        assert!(cli(&["--physical", "usbdrive"]).validate().is_err());
        assert!(cli(&["--physical", "disk4"]).validate().is_ok());
    }

    #[test]
    fn test_cli_validation_rejects_blank_volume() {
        assert!(cli(&["--volume", "  "]).validate().is_err());
    }

    #[test]
    fn test_config_path_str() {
        let with = cli(&["--config", "config.toml"]);
        assert_eq!(with.config_path_str().unwrap(), Some("config.toml"));
        let without = cli(&[]);
        assert_eq!(without.config_path_str().unwrap(), None);
    }

    #[test]
    fn test_mode_selection() {
        assert_eq!(
            cli(&[]).sampling_mode("/").unwrap(),
            SamplingMode::InternalDisk {
                root_mount: "/".to_string()
            }
        );
        assert_eq!(
            cli(&["--physical", "disk4"]).sampling_mode("/").unwrap(),
            SamplingMode::ExternalPhysical {
                device: DeviceId::parse("disk4").unwrap()
            }
        );
        assert_eq!(
            cli(&["--volume", "/Volumes/iMac"]).sampling_mode("/").unwrap(),
            SamplingMode::ExternalVolume {
                mount_path: "/Volumes/iMac".to_string(),
                physical: None
            }
        );
        assert_eq!(
            cli(&["--volume", "/Volumes/iMac", "--physical", "disk4s2"])
                .sampling_mode("/")
                .unwrap(),
            SamplingMode::ExternalVolume {
                mount_path: "/Volumes/iMac".to_string(),
                physical: DeviceId::parse("disk4")
            }
        );
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut config = Config::default();
        config.sampling.interval_seconds = Some(900);
        cli(&["--out-dir", "/tmp/disk", "--interval", "30"]).apply_overrides(&mut config);
        assert_eq!(config.output.dir, PathBuf::from("/tmp/disk"));
        assert_eq!(config.sampling.interval_seconds, Some(30));

        let mut untouched = Config::default();
        cli(&[]).apply_overrides(&mut untouched);
        assert_eq!(untouched, Config::default());
    }

    #[test]
    fn test_load_config_falls_back_to_defaults() {
        assert_eq!(load_config(None), Config::default());
        assert_eq!(
            load_config(Some("/nonexistent/config.toml")),
            Config::default()
        );

        let dir = tempfile::tempdir().unwrap();
        let invalid = dir.path().join("bad.toml");
        std::fs::write(&invalid, "[sampling]\ninterval_seconds = 0\n").unwrap();
        assert_eq!(load_config(invalid.to_str()), Config::default());
    }

    #[test]
    fn test_load_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");
        std::fs::write(&file, "[logs]\nmax_lines = 100\n").unwrap();
        assert_eq!(load_config(file.to_str()).logs.max_lines, 100);
    }
}
