//! Built-in classification rules for storage-related log lines
//!
//! Each rule decides whether a (already relevant) line belongs to one problem
//! category. Patterns are case-insensitive.

use crate::classifier::ClassificationRule;
use crate::records::LogCategory;
use regex::{Regex, RegexBuilder};

fn case_insensitive(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .expect("built-in pattern")
}

const IO_ERROR_PATTERN: &str = r"I/O error|media is not present|unable to read|timeout|unresponsive";
const MOUNT_FAIL_PATTERN: &str =
    r"unable to mount|mount.*failed|unmount.*failed|dissented|not mounted";
const MASS_STORAGE_PATTERN: &str = r"USBMSC|MassStorage|IOUSBMassStorage|IOSCSI|USB.*Mass";
const USB_HOST_PATTERN: &str =
    r"IOUSBHost|AppleUSB|device removed|disconnect|terminated|enumerat|reset";
const FILESYSTEM_PATTERN: &str = r"apfs|hfs|exfat";
const FILESYSTEM_PROBLEM_PATTERN: &str =
    r"error|failed|fsck|corrupt|inconsistent|invalid|checksum|unable";
const FILESYSTEM_NOISE_PATTERN: &str =
    r"tx_flush|volume is not sealed|cannot perform extent manipulation";

/// Rule that matches a single pattern
pub struct PatternRule {
    name: &'static str,
    category: LogCategory,
    pattern: Regex,
}

impl PatternRule {
    pub fn new(name: &'static str, category: LogCategory, pattern: &str) -> Self {
        Self {
            name,
            category,
            pattern: case_insensitive(pattern),
        }
    }

    /// Read failures, missing media, timeouts
    pub fn io_error() -> Self {
        Self::new("IoErrorRule", LogCategory::IoError, IO_ERROR_PATTERN)
    }

    /// Mount and unmount failures, including dissented requests
    pub fn mount_unmount_fail() -> Self {
        Self::new(
            "MountUnmountFailRule",
            LogCategory::MountUnmountFail,
            MOUNT_FAIL_PATTERN,
        )
    }

    /// Any mass-storage driver chatter
    pub fn usb_mass_storage() -> Self {
        Self::new(
            "UsbMassStorageRule",
            LogCategory::UsbMassStorage,
            MASS_STORAGE_PATTERN,
        )
    }
}

impl ClassificationRule for PatternRule {
    fn matches(&self, line: &str) -> bool {
        self.pattern.is_match(line)
    }

    fn category(&self) -> LogCategory {
        self.category
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// USB host-controller disconnect/reset wording tied to mass storage
///
/// Host-controller words alone are common for keyboards and hubs, so the line
/// must also carry a mass-storage marker.
pub struct UsbDisconnectRule {
    host: Regex,
    mass_storage: Regex,
}

impl UsbDisconnectRule {
    pub fn new() -> Self {
        Self {
            host: case_insensitive(USB_HOST_PATTERN),
            mass_storage: case_insensitive(MASS_STORAGE_PATTERN),
        }
    }
}

impl Default for UsbDisconnectRule {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassificationRule for UsbDisconnectRule {
    fn matches(&self, line: &str) -> bool {
        if !self.host.is_match(line) {
            return false;
        }
        let lowered = line.to_lowercase();
        self.mass_storage.is_match(line)
            || lowered.contains("iousbhost")
            || lowered.contains("usbmsc")
    }

    fn category(&self) -> LogCategory {
        LogCategory::UsbDisconnectReset
    }

    fn name(&self) -> &str {
        "UsbDisconnectRule"
    }
}

/// Filesystem mentions combined with problem wording, minus known noise
pub struct FilesystemWarningRule {
    filesystem: Regex,
    problem: Regex,
    noise: Regex,
}

impl FilesystemWarningRule {
    pub fn new() -> Self {
        Self {
            filesystem: case_insensitive(FILESYSTEM_PATTERN),
            problem: case_insensitive(FILESYSTEM_PROBLEM_PATTERN),
            noise: case_insensitive(FILESYSTEM_NOISE_PATTERN),
        }
    }
}

impl Default for FilesystemWarningRule {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassificationRule for FilesystemWarningRule {
    fn matches(&self, line: &str) -> bool {
        self.filesystem.is_match(line) && self.problem.is_match(line) && !self.noise.is_match(line)
    }

    fn category(&self) -> LogCategory {
        LogCategory::FilesystemWarn
    }

    fn name(&self) -> &str {
        "FilesystemWarningRule"
    }
}
