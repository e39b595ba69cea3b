/// Classifier engine and rule trait
pub mod engine;
pub mod rules;

pub use engine::{ClassificationRule, LogClassifier};
pub use rules::{FilesystemWarningRule, PatternRule, UsbDisconnectRule};
