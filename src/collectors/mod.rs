/// External command execution with timeouts
pub mod command;

/// Physical disk / container / volume resolution
pub mod topology;

/// smartctl health payload querying and normalization
pub mod health;

/// Unified log window fetching and relevance tokens
pub mod log_collector;

/// Filesystem capacity queries
pub mod space;

pub use command::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use health::HealthExtractor;
pub use log_collector::LogCollector;
pub use topology::TopologyResolver;
