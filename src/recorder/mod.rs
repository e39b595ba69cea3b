/// Day-partitioned CSV telemetry output
pub mod csv_recorder;

pub use csv_recorder::{sanitize_name, TelemetryRecorder};
