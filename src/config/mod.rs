/// TOML-backed collector configuration
#[allow(clippy::module_inception)]
pub mod config;

/// Host identity resolved once per run
pub mod host;

pub use config::{CommandConfig, Config, LogConfig, OutputConfig, SamplingConfig};
pub use host::HostContext;
