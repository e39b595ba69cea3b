use crate::collectors::command::CommandRunner;
use crate::collectors::topology::mount_basename;
use crate::config::LogConfig;
use crate::records::{DeviceId, Topology};
use log::{debug, warn};

/// Process whose messages are always fetched regardless of tokens
const DISK_ARBITRATION_PROCESS: &str = "diskarbitrationd";

/// Strings a log line must contain (case-insensitively) to concern this topology
///
/// Device identifiers appear bare, with the slice separator and as device
/// nodes; volumes contribute their display name and mount-point basename.
/// Empty and duplicate tokens are dropped, first occurrence wins.
pub fn build_relevance_tokens(topology: &Topology) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut push = |token: String| {
        if !token.is_empty() && !tokens.contains(&token) {
            tokens.push(token);
        }
    };

    for device in [&topology.physical, &topology.container].into_iter().flatten() {
        for token in device_tokens(device) {
            push(token);
        }
    }
    for volume in &topology.volumes {
        push(volume.name.clone());
        push(mount_basename(&volume.mount_point));
    }
    tokens
}

fn device_tokens(device: &DeviceId) -> [String; 3] {
    [
        device.as_str().to_string(),
        format!("{}s", device),
        device.block_node(),
    ]
}

/// `log show` predicate matching any token or the disk arbitration daemon
pub fn build_log_predicate(tokens: &[String]) -> String {
    let mut parts: Vec<String> = tokens
        .iter()
        .filter(|t| !t.is_empty())
        .map(|t| format!("(eventMessage CONTAINS[c] \"{}\")", t.replace('"', "\\\"")))
        .collect();
    parts.push(format!("(process == \"{}\")", DISK_ARBITRATION_PROCESS));
    parts.join(" OR ")
}

/// Fetches a bounded trailing window of the unified system log
pub struct LogCollector<'a> {
    runner: &'a dyn CommandRunner,
    limits: LogConfig,
}

impl<'a> LogCollector<'a> {
    pub fn new(runner: &'a dyn CommandRunner, limits: LogConfig) -> Self {
        Self { runner, limits }
    }

    /// Clamp the requested window into the configured bounds
    pub fn clamp_window(&self, window_seconds: u64) -> u64 {
        window_seconds.clamp(self.limits.min_window_seconds, self.limits.max_window_seconds)
    }

    /// Fetch recent syslog-style lines relevant to `tokens`
    ///
    /// A failed query still returns whatever was printed, with the error text
    /// appended, so the classifier sees the failure wording. Only the most
    /// recent `max_lines` lines are kept.
    pub fn fetch_recent_log(&self, window_seconds: u64, tokens: &[String]) -> String {
        let window = format!("{}s", self.clamp_window(window_seconds));
        let predicate = build_log_predicate(tokens);
        debug!("Fetching last {} of system log", window);

        let output = self.runner.run(
            "log",
            &[
                "show",
                "--style",
                "syslog",
                "--last",
                &window,
                "--predicate",
                &predicate,
            ],
        );

        let text = if output.success() {
            output.stdout_text()
        } else {
            warn!(
                "log show exited with status {}: {}",
                output.status,
                output.stderr.trim()
            );
            format!("{}\n{}", output.stdout_text(), output.stderr)
        };

        tail_lines(&text, self.limits.max_lines)
    }
}

/// Keep the last `max_lines` lines of `text`
pub fn tail_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::command::testing::ScriptedRunner;
    use crate::collectors::command::CommandOutput;
    use crate::records::Volume;

    fn topology() -> Topology {
        Topology {
            physical: DeviceId::parse("disk4"),
            container: DeviceId::parse("disk5"),
            volumes: vec![
                Volume {
                    name: "Backup".to_string(),
                    device_id: "disk5s2".to_string(),
                    mount_point: "/Volumes/Backup".to_string(),
                    ..Volume::default()
                },
                Volume {
                    name: "Photo Library".to_string(),
                    device_id: "disk5s3".to_string(),
                    mount_point: "/Volumes/Photos/".to_string(),
                    ..Volume::default()
                },
            ],
        }
    }

    #[test]
    fn test_relevance_tokens() {
        assert_eq!(
            build_relevance_tokens(&topology()),
            vec![
                "disk4",
                "disk4s",
                "/dev/disk4",
                "disk5",
                "disk5s",
                "/dev/disk5",
                "Backup",
                "Photo Library",
                "Photos",
            ]
        );
    }

    #[test]
    fn test_relevance_tokens_empty_topology() {
        assert!(build_relevance_tokens(&Topology::default()).is_empty());
    }

    #[test]
    fn test_predicate_escapes_quotes() {
        let predicate = build_log_predicate(&["disk4".to_string(), "My \"Disk\"".to_string()]);
        assert_eq!(
            predicate,
            r#"(eventMessage CONTAINS[c] "disk4") OR (eventMessage CONTAINS[c] "My \"Disk\"") OR (process == "diskarbitrationd")"#
        );
    }

    #[test]
    fn test_predicate_without_tokens() {
        assert_eq!(build_log_predicate(&[]), r#"(process == "diskarbitrationd")"#);
    }

    #[test]
    fn test_window_is_clamped() {
        let runner = ScriptedRunner::new();
        let collector = LogCollector::new(&runner, LogConfig::default());
        assert_eq!(collector.clamp_window(1), 10);
        assert_eq!(collector.clamp_window(300), 300);
        assert_eq!(collector.clamp_window(86_400), 3600);
    }

    #[test]
    fn test_fetch_keeps_most_recent_lines() {
        let tokens = vec!["disk4".to_string()];
        let command = format!(
            "log show --style syslog --last 300s --predicate {}",
            build_log_predicate(&tokens)
        );
        let body: String = (1..=10).map(|i| format!("line {}\n", i)).collect();
        let runner = ScriptedRunner::new().on_stdout(&command, &body);
        let limits = LogConfig {
            max_lines: 3,
            ..LogConfig::default()
        };
        let collector = LogCollector::new(&runner, limits);
        assert_eq!(collector.fetch_recent_log(300, &tokens), "line 8\nline 9\nline 10");
    }

    #[test]
    fn test_fetch_failure_includes_error_text() {
        let command = format!(
            "log show --style syslog --last 10s --predicate {}",
            build_log_predicate(&[])
        );
        let runner = ScriptedRunner::new().on(
            &command,
            CommandOutput::new(64, "partial\n", "log: predicate invalid"),
        );
        let collector = LogCollector::new(&runner, LogConfig::default());
        assert_eq!(
            collector.fetch_recent_log(0, &[]),
            "partial\n\nlog: predicate invalid"
        );
    }

    #[test]
    fn test_tail_lines() {
        assert_eq!(tail_lines("a\nb\nc", 5), "a\nb\nc");
        assert_eq!(tail_lines("a\nb\nc", 1), "c");
        assert_eq!(tail_lines("", 3), "");
    }
}
