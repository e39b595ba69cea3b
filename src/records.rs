//! Core record types for the disk health collector
//!
//! This module defines the data structures that flow from the topology resolver
//! through the health extractor and log classifier into the telemetry recorder.

use regex::Regex;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// Placeholder written wherever a device could not be resolved
pub const UNKNOWN_DEVICE: &str = "UNKNOWN";

fn disk_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"disk\d+").expect("static regex"))
}

/// Whole-device identifier such as `disk0`
///
/// Always holds a bare `disk<N>` token; slice suffixes (`s2`) are stripped on
/// construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
    /// Extract the first `disk<N>` token from arbitrary text
    ///
    /// `"disk0s2"` and `"/dev/disk0s2"` both yield `disk0`. The digits are
    /// matched greedily, so `"disk15s2"` yields `disk15`, never `disk1`.
    pub fn parse(text: &str) -> Option<Self> {
        disk_token_regex()
            .find(text)
            .map(|m| DeviceId(m.as_str().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Block device node, e.g. `/dev/disk0`
    pub fn block_node(&self) -> String {
        format!("/dev/{}", self.0)
    }

    /// Raw character device node, e.g. `/dev/rdisk0`
    pub fn raw_node(&self) -> String {
        format!("/dev/r{}", self.0)
    }

    /// Whether `slice_id` (e.g. `disk5s2`) is a slice of this device
    ///
    /// The slice separator is part of the prefix, so `disk15s2` is not a slice
    /// of `disk1`.
    pub fn owns_slice(&self, slice_id: &str) -> bool {
        slice_id
            .strip_prefix(self.0.as_str())
            .is_some_and(|rest| rest.starts_with('s'))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A mountable filesystem instance discovered during one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Volume {
    /// Display name (`VolumeName`)
    pub name: String,
    /// Slice identifier such as `disk5s2`
    pub device_id: String,
    /// Mount path, empty when unmounted
    pub mount_point: String,
    /// Filesystem personality, e.g. `apfs`
    pub fs_type: String,
    /// `VolumeUUID`
    pub uuid: String,
}

/// Resolved device/container/volume topology for one sampling pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    pub physical: Option<DeviceId>,
    pub container: Option<DeviceId>,
    pub volumes: Vec<Volume>,
}

/// Human-readable `diskutil info` fields for a whole disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskInfo {
    pub device_node: String,
    pub protocol: String,
    pub model: String,
    pub serial: String,
    pub firmware: String,
    pub smart_status: String,
    pub internal: String,
}

/// Structured (`-plist`) information for a physical device that answered
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhysicalInfo {
    pub protocol: String,
    pub internal: String,
    pub removable: String,
    pub ejectable: String,
    pub media_name: String,
    /// Compact JSON rendering of the full dictionary
    pub raw_json: String,
}

/// Normalized disk health counters
///
/// Every numeric field is `None` when the tool did not expose it, which keeps
/// "absent" distinct from zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthMetrics {
    pub nvme_log_found: bool,
    pub smart_passed: Option<bool>,
    pub temp_c: Option<i64>,
    pub percent_used: Option<i64>,
    pub available_spare: Option<i64>,
    pub available_spare_threshold: Option<i64>,
    pub data_units_read: Option<i64>,
    pub data_units_written: Option<i64>,
    pub data_read_tb: Option<f64>,
    pub data_written_tb: Option<f64>,
    pub power_on_hours: Option<i64>,
    pub power_cycles: Option<i64>,
    pub unsafe_shutdowns: Option<i64>,
    pub media_errors: Option<i64>,
    pub num_err_log_entries: Option<i64>,
    pub warning_temp_time: Option<i64>,
    pub critical_comp_time: Option<i64>,
    /// Compact JSON of the whole tool payload, empty when none was parsed
    pub raw_payload: String,
}

/// Problem categories a relevant log line can be counted under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogCategory {
    IoError,
    MountUnmountFail,
    UsbMassStorage,
    UsbDisconnectReset,
    FilesystemWarn,
}

impl LogCategory {
    pub const ALL: [LogCategory; 5] = [
        LogCategory::IoError,
        LogCategory::MountUnmountFail,
        LogCategory::UsbMassStorage,
        LogCategory::UsbDisconnectReset,
        LogCategory::FilesystemWarn,
    ];

    /// Column / JSON key for this category
    pub fn name(self) -> &'static str {
        match self {
            LogCategory::IoError => "io_error",
            LogCategory::MountUnmountFail => "mount_unmount_fail",
            LogCategory::UsbMassStorage => "usb_mass_storage",
            LogCategory::UsbDisconnectReset => "usb_disconnect_reset",
            LogCategory::FilesystemWarn => "filesystem_warn",
        }
    }
}

/// Per-category counts plus capped literal sample lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogClassification {
    /// Total lines in the fetched window, relevant or not
    pub log_lines: usize,
    counts: BTreeMap<LogCategory, usize>,
    samples: BTreeMap<LogCategory, Vec<String>>,
}

impl LogClassification {
    pub fn count(&self, category: LogCategory) -> usize {
        self.counts.get(&category).copied().unwrap_or(0)
    }

    pub fn samples(&self, category: LogCategory) -> &[String] {
        self.samples
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Count one matching line, retaining it as a sample while under `sample_limit`
    pub fn record(&mut self, category: LogCategory, line: &str, sample_limit: usize, max_chars: usize) {
        *self.counts.entry(category).or_insert(0) += 1;
        let samples = self.samples.entry(category).or_default();
        if samples.len() < sample_limit {
            samples.push(line.chars().take(max_chars).collect());
        }
    }

    /// Samples as a compact JSON object with one (possibly empty) array per category
    pub fn samples_json(&self) -> String {
        let map: serde_json::Map<String, serde_json::Value> = LogCategory::ALL
            .iter()
            .map(|c| {
                let lines = self
                    .samples(*c)
                    .iter()
                    .map(|l| serde_json::Value::String(l.clone()))
                    .collect();
                (c.name().to_string(), serde_json::Value::Array(lines))
            })
            .collect();
        serde_json::Value::Object(map).to_string()
    }
}

/// Capacity of a mounted filesystem
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpaceUsage {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_bytes: u64,
    /// `None` for a zero-sized filesystem
    pub used_pct: Option<f64>,
}

fn serialize_flag<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(if *value { "1" } else { "0" })
}

fn serialize_opt_flag<S: Serializer>(value: &Option<bool>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serialize_flag(v, serializer),
        None => serializer.serialize_str(""),
    }
}

/// One disk-mode row (internal/boot disk health)
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DiskRow {
    pub timestamp: String,
    pub host: String,
    pub os_version: String,
    pub disk: String,
    pub device_node: String,
    pub internal: String,
    pub protocol: String,
    pub model: String,
    pub serial: String,
    pub firmware: String,
    pub smart_status: String,
    pub smartctl_rc: Option<i32>,
    pub smartctl_err: String,
    pub smartctl_devnode: String,
    #[serde(serialize_with = "serialize_flag")]
    pub nvme_log_found: bool,
    #[serde(serialize_with = "serialize_opt_flag")]
    pub smart_passed: Option<bool>,
    pub temp_c: Option<i64>,
    pub percent_used: Option<i64>,
    pub available_spare: Option<i64>,
    pub available_spare_threshold: Option<i64>,
    pub data_units_read: Option<i64>,
    pub data_units_written: Option<i64>,
    pub data_read_tb: Option<f64>,
    pub data_written_tb: Option<f64>,
    pub power_on_hours: Option<i64>,
    pub power_cycles: Option<i64>,
    pub unsafe_shutdowns: Option<i64>,
    pub media_errors: Option<i64>,
    pub num_err_log_entries: Option<i64>,
    pub warning_temp_time: Option<i64>,
    pub critical_comp_time: Option<i64>,
    pub sample_interval_s: u64,
    pub smart_json: String,
}

/// One external-mode row (a volume, or the placeholder when none is mounted)
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VolumeRow {
    pub timestamp: String,
    pub host: String,
    pub os_version: String,
    pub mode: String,
    pub physical_disk: String,
    pub container_disk: String,
    pub volume_name: String,
    pub volume_disk: String,
    pub mount_point: String,
    pub fs_type: String,
    pub volume_uuid: String,
    #[serde(serialize_with = "serialize_flag")]
    pub present: bool,
    #[serde(serialize_with = "serialize_flag")]
    pub mounted: bool,
    pub protocol: String,
    pub internal: String,
    pub removable: String,
    pub ejectable: String,
    pub device_media_name: String,
    pub total_bytes: Option<u64>,
    pub free_bytes: Option<u64>,
    pub used_bytes: Option<u64>,
    pub used_pct: Option<f64>,
    pub log_lines: usize,
    pub io_error: usize,
    pub mount_unmount_fail: usize,
    pub usb_mass_storage: usize,
    pub usb_disconnect_reset: usize,
    pub filesystem_warn: usize,
    pub log_samples_json: String,
    pub diskutil_physical_json: String,
    pub sample_interval_s: u64,
}
