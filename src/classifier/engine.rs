use crate::classifier::rules::{FilesystemWarningRule, PatternRule, UsbDisconnectRule};
use crate::config::LogConfig;
use crate::records::{LogCategory, LogClassification};

/// Buckets relevant log lines into problem categories
pub struct LogClassifier {
    rules: Vec<Box<dyn ClassificationRule>>,
    samples_per_category: usize,
    sample_max_chars: usize,
}

/// A single category test applied to each relevant log line
pub trait ClassificationRule: Send + Sync {
    /// Whether the line belongs to this rule's category
    fn matches(&self, line: &str) -> bool;

    /// Category counted when the rule matches
    fn category(&self) -> LogCategory;

    /// Human-readable name for this rule
    fn name(&self) -> &str;
}

impl Default for LogClassifier {
    fn default() -> Self {
        Self::with_default_rules(&LogConfig::default())
    }
}

impl LogClassifier {
    /// Create a classifier with no rules
    pub fn new(limits: &LogConfig) -> Self {
        Self {
            rules: Vec::new(),
            samples_per_category: limits.samples_per_category,
            sample_max_chars: limits.sample_max_chars,
        }
    }

    /// Classifier with the built-in storage problem categories
    pub fn with_default_rules(limits: &LogConfig) -> Self {
        let mut classifier = Self::new(limits);
        classifier.add_rule(Box::new(PatternRule::io_error()));
        classifier.add_rule(Box::new(PatternRule::mount_unmount_fail()));
        classifier.add_rule(Box::new(PatternRule::usb_mass_storage()));
        classifier.add_rule(Box::new(UsbDisconnectRule::new()));
        classifier.add_rule(Box::new(FilesystemWarningRule::new()));
        classifier
    }

    /// Add a rule to the classifier
    pub fn add_rule(&mut self, rule: Box<dyn ClassificationRule>) {
        self.rules.push(rule);
    }

    /// Get the number of configured rules
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Classify every line of `text`
    ///
    /// Lines containing none of `tokens` (case-insensitive) are skipped before
    /// any rule sees them. A line may count toward several categories; lines
    /// matching nothing are simply not counted.
    pub fn classify(&self, text: &str, tokens: &[String]) -> LogClassification {
        let mut result = LogClassification::default();
        if text.trim().is_empty() {
            return result;
        }

        let lowered_tokens: Vec<String> = tokens
            .iter()
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();

        for line in text.lines() {
            result.log_lines += 1;

            let lowered = line.to_lowercase();
            if !lowered_tokens.iter().any(|t| lowered.contains(t.as_str())) {
                continue;
            }

            for rule in &self.rules {
                if rule.matches(line) {
                    result.record(
                        rule.category(),
                        line,
                        self.samples_per_category,
                        self.sample_max_chars,
                    );
                }
            }
        }

        result
    }
}
