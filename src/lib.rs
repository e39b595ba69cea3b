/// Error types for collectors, recorder and configuration
pub mod error;

/// Row and record types shared by every stage
pub mod records;

/// External tool wrappers: topology, health, system log, capacity
pub mod collectors;

/// Storage problem classification of system log lines
pub mod classifier;

/// Day-partitioned CSV output
pub mod recorder;

/// Sampling passes and the interval loop
pub mod sampler;

/// Configuration management
pub mod config;

// Re-export commonly used types
pub use error::{CollectorError, ConfigError, RecorderError};
pub use sampler::{Sampler, SamplingMode};
