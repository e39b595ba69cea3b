//! Sampling passes and the interval loop
//!
//! One pass resolves topology, gathers health or capacity plus log
//! classification, and appends the resulting rows. Every sub-query degrades
//! to empty fields on failure; only a failed row write ends a pass early.

use crate::classifier::LogClassifier;
use crate::collectors::log_collector::build_relevance_tokens;
use crate::collectors::space::filesystem_usage;
use crate::collectors::{CommandRunner, HealthExtractor, LogCollector, TopologyResolver};
use crate::config::{Config, HostContext};
use crate::error::RecorderError;
use crate::recorder::TelemetryRecorder;
use crate::records::{
    DeviceId, DiskRow, LogCategory, PhysicalInfo, Topology, Volume, VolumeRow, UNKNOWN_DEVICE,
};
use chrono::{Local, SecondsFormat};
use log::{debug, error, info};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Granularity of the interruptible sleep between passes
const SLEEP_SLICE: Duration = Duration::from_millis(500);

/// What a sampler observes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SamplingMode {
    /// Health of the whole disk backing `root_mount`
    InternalDisk { root_mount: String },
    /// Every mounted volume of the container hosted on `device`
    ExternalPhysical { device: DeviceId },
    /// One explicitly named mount path, optionally with its physical device
    ExternalVolume {
        mount_path: String,
        physical: Option<DeviceId>,
    },
}

impl SamplingMode {
    pub fn is_external(&self) -> bool {
        !matches!(self, SamplingMode::InternalDisk { .. })
    }

    /// Prefix of the CSV file names written in this mode
    pub fn file_prefix(&self) -> &'static str {
        match self {
            SamplingMode::InternalDisk { .. } => "ssd_smart",
            _ => "external_disk",
        }
    }

    /// Value of the `mode` column in external rows
    pub fn label(&self) -> &'static str {
        match self {
            SamplingMode::InternalDisk { .. } => "disk",
            SamplingMode::ExternalPhysical { .. } => "physical",
            SamplingMode::ExternalVolume { .. } => "volume",
        }
    }
}

/// What one pass wrote
#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub path: PathBuf,
    pub rows: usize,
    /// Human-readable summary, already printed to stdout
    pub lines: Vec<String>,
}

/// Drives sampling passes for one target
pub struct Sampler<'a> {
    runner: &'a dyn CommandRunner,
    host: HostContext,
    config: Config,
    mode: SamplingMode,
    recorder: TelemetryRecorder,
    classifier: LogClassifier,
    interval_seconds: u64,
    debug: bool,
}

impl<'a> Sampler<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        host: HostContext,
        config: Config,
        mode: SamplingMode,
    ) -> Self {
        let interval_seconds = config.interval_seconds(mode.is_external());
        let recorder = TelemetryRecorder::new(config.output_dir(), mode.file_prefix());
        let classifier = LogClassifier::with_default_rules(&config.logs);
        Self {
            runner,
            host,
            config,
            mode,
            recorder,
            classifier,
            interval_seconds,
            debug: false,
        }
    }

    /// Print resolved topology to stderr on every pass
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn interval_seconds(&self) -> u64 {
        self.interval_seconds
    }

    pub fn recorder(&self) -> &TelemetryRecorder {
        &self.recorder
    }

    /// Run one full pass and print its summary
    ///
    /// # Errors
    ///
    /// Returns `RecorderError` when the rows could not be appended. Failed
    /// external queries never surface here.
    pub fn sample_once(&self) -> Result<PassReport, RecorderError> {
        let report = match &self.mode {
            SamplingMode::InternalDisk { root_mount } => self.sample_disk(root_mount)?,
            SamplingMode::ExternalPhysical { device } => self.sample_physical(device)?,
            SamplingMode::ExternalVolume {
                mount_path,
                physical,
            } => self.sample_volume(mount_path, physical.as_ref())?,
        };
        for line in &report.lines {
            println!("{}", line);
        }
        Ok(report)
    }

    /// Repeat passes every interval until `stop` is raised
    ///
    /// A failed pass is logged and the loop waits for the next one.
    pub fn run(&self, stop: &AtomicBool) {
        info!(
            "Sampling {} every {}s",
            self.mode.label(),
            self.interval_seconds
        );
        while !stop.load(Ordering::SeqCst) {
            if let Err(e) = self.sample_once() {
                error!("Sampling pass failed: {}", e);
            }
            sleep_unless_stopped(Duration::from_secs(self.interval_seconds), stop);
        }
        info!("Sampling stopped");
    }

    fn resolver(&self) -> TopologyResolver<'a> {
        TopologyResolver::new(self.runner, &self.config.sampling.mount_root)
    }

    fn sample_disk(&self, root_mount: &str) -> Result<PassReport, RecorderError> {
        let resolver = self.resolver();
        let device = resolver.resolve_physical_device_for_mount(root_mount);
        let info = resolver.disk_info(device.as_ref());
        let (metrics, query) = HealthExtractor::new(self.runner).extract(device.as_ref());
        let disk = device
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_else(|| UNKNOWN_DEVICE.to_string());

        if self.debug {
            eprintln!(
                "[DEBUG] root={} -> disk={} node={}",
                root_mount, disk, query.device_node
            );
        }

        let row = DiskRow {
            timestamp: timestamp(),
            host: self.host.host.clone(),
            os_version: self.host.os_version.clone(),
            disk: disk.clone(),
            device_node: info.device_node,
            internal: info.internal,
            protocol: info.protocol,
            model: info.model,
            serial: info.serial,
            firmware: info.firmware,
            smart_status: info.smart_status,
            smartctl_rc: query.exit_status,
            smartctl_err: query.error_text,
            smartctl_devnode: query.device_node,
            nvme_log_found: metrics.nvme_log_found,
            smart_passed: metrics.smart_passed,
            temp_c: metrics.temp_c,
            percent_used: metrics.percent_used,
            available_spare: metrics.available_spare,
            available_spare_threshold: metrics.available_spare_threshold,
            data_units_read: metrics.data_units_read,
            data_units_written: metrics.data_units_written,
            data_read_tb: metrics.data_read_tb,
            data_written_tb: metrics.data_written_tb,
            power_on_hours: metrics.power_on_hours,
            power_cycles: metrics.power_cycles,
            unsafe_shutdowns: metrics.unsafe_shutdowns,
            media_errors: metrics.media_errors,
            num_err_log_entries: metrics.num_err_log_entries,
            warning_temp_time: metrics.warning_temp_time,
            critical_comp_time: metrics.critical_comp_time,
            sample_interval_s: self.interval_seconds,
            smart_json: metrics.raw_payload,
        };

        let path = self.recorder.append(&self.host.host, &disk, &row)?;

        let mut lines = vec![
            format!("Wrote: {}", path.display()),
            format!(
                "disk={}, nvme_log_found={}, temp_c={}, percent_used={}, written_tb={}",
                disk,
                u8::from(row.nvme_log_found),
                cell(&row.temp_c),
                cell(&row.percent_used),
                cell(&row.data_written_tb)
            ),
        ];
        if row.smart_json.is_empty() {
            lines.push(
                "WARN: smartctl JSON is empty. Check sudo, smartctl path and /dev/rdisk access."
                    .to_string(),
            );
        } else if !row.nvme_log_found {
            lines.push(
                "WARN: JSON exists but NVMe log not found. Check smart_json or smartctl output structure."
                    .to_string(),
            );
        }

        Ok(PassReport {
            path,
            rows: 1,
            lines,
        })
    }

    fn sample_physical(&self, device: &DeviceId) -> Result<PassReport, RecorderError> {
        let resolver = self.resolver();
        let physical_info = resolver.physical_info(device);
        let container = resolver.resolve_container_for_device(device);
        let volumes = match &container {
            Some(container) => resolver.scan_volumes_for_container(container),
            None => Vec::new(),
        };

        let topology = Topology {
            physical: Some(device.clone()),
            container,
            volumes,
        };
        if self.debug {
            print_topology(&topology);
        }

        let present = physical_info.is_some();
        self.sample_volumes(&resolver, &topology, physical_info, present, device.as_str())
    }

    fn sample_volume(
        &self,
        mount_path: &str,
        physical: Option<&DeviceId>,
    ) -> Result<PassReport, RecorderError> {
        let resolver = self.resolver();
        let physical_info = physical.and_then(|d| resolver.physical_info(d));
        let (volume, container) = resolver.volume_for_mount(mount_path);
        let present = match physical {
            Some(_) => physical_info.is_some(),
            None => !volume.device_id.is_empty(),
        };

        let topology = Topology {
            physical: physical.cloned(),
            container,
            volumes: vec![volume],
        };
        if self.debug {
            print_topology(&topology);
        }

        self.sample_volumes(&resolver, &topology, physical_info, present, mount_path)
    }

    /// Shared tail of both external modes: one log fetch, one row per volume
    fn sample_volumes(
        &self,
        resolver: &TopologyResolver<'_>,
        topology: &Topology,
        physical_info: Option<PhysicalInfo>,
        present: bool,
        entity: &str,
    ) -> Result<PassReport, RecorderError> {
        let tokens = build_relevance_tokens(topology);
        let log_text = LogCollector::new(self.runner, self.config.logs.clone())
            .fetch_recent_log(self.interval_seconds, &tokens);
        let classification = self.classifier.classify(&log_text, &tokens);
        let samples_json = classification.samples_json();

        let physical_info = physical_info.unwrap_or_default();
        let physical_disk = topology
            .physical
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default();
        let container_disk = topology
            .container
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default();

        let placeholder = [Volume::default()];
        let volumes: &[Volume] = if topology.volumes.is_empty() {
            debug!("No volumes found, writing a summary row");
            &placeholder
        } else {
            &topology.volumes
        };

        let timestamp = timestamp();
        let mut mounted_count = 0;
        let rows: Vec<VolumeRow> = volumes
            .iter()
            .map(|volume| {
                let mounted = resolver.is_mounted(volume);
                let usage = if mounted {
                    mounted_count += 1;
                    filesystem_usage(Path::new(&volume.mount_point))
                } else {
                    None
                };

                VolumeRow {
                    timestamp: timestamp.clone(),
                    host: self.host.host.clone(),
                    os_version: self.host.os_version.clone(),
                    mode: self.mode.label().to_string(),
                    physical_disk: physical_disk.clone(),
                    container_disk: container_disk.clone(),
                    volume_name: volume.name.clone(),
                    volume_disk: volume.device_id.clone(),
                    mount_point: volume.mount_point.clone(),
                    fs_type: volume.fs_type.clone(),
                    volume_uuid: volume.uuid.clone(),
                    present,
                    mounted,
                    protocol: physical_info.protocol.clone(),
                    internal: physical_info.internal.clone(),
                    removable: physical_info.removable.clone(),
                    ejectable: physical_info.ejectable.clone(),
                    device_media_name: physical_info.media_name.clone(),
                    total_bytes: usage.map(|u| u.total_bytes),
                    free_bytes: usage.map(|u| u.free_bytes),
                    used_bytes: usage.map(|u| u.used_bytes),
                    used_pct: usage.and_then(|u| u.used_pct),
                    log_lines: classification.log_lines,
                    io_error: classification.count(LogCategory::IoError),
                    mount_unmount_fail: classification.count(LogCategory::MountUnmountFail),
                    usb_mass_storage: classification.count(LogCategory::UsbMassStorage),
                    usb_disconnect_reset: classification.count(LogCategory::UsbDisconnectReset),
                    filesystem_warn: classification.count(LogCategory::FilesystemWarn),
                    log_samples_json: samples_json.clone(),
                    diskutil_physical_json: physical_info.raw_json.clone(),
                    sample_interval_s: self.interval_seconds,
                }
            })
            .collect();

        let path = self.recorder.append_rows(&self.host.host, entity, &rows)?;

        let lines = vec![
            format!("Wrote: {}", path.display()),
            format!(
                "mode={} physical={} container={} mounted_vols={} io_error={} mount_fail={} usb_ms={} usb_reset={} fs_warn={}",
                self.mode.label(),
                physical_disk,
                container_disk,
                mounted_count,
                classification.count(LogCategory::IoError),
                classification.count(LogCategory::MountUnmountFail),
                classification.count(LogCategory::UsbMassStorage),
                classification.count(LogCategory::UsbDisconnectReset),
                classification.count(LogCategory::FilesystemWarn),
            ),
        ];

        Ok(PassReport {
            path,
            rows: rows.len(),
            lines,
        })
    }
}

fn print_topology(topology: &Topology) {
    eprintln!(
        "[DEBUG] physical={} -> container={}",
        display_device(&topology.physical),
        display_device(&topology.container)
    );
    for volume in &topology.volumes {
        eprintln!(
            "[DEBUG] vol: {} @ {} ({})",
            volume.name, volume.mount_point, volume.device_id
        );
    }
}

fn display_device(device: &Option<DeviceId>) -> String {
    device.as_ref().map(|d| d.to_string()).unwrap_or_default()
}

fn cell<T: Display>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

/// Local time, RFC 3339 with seconds precision
fn timestamp() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Sleep for `total`, waking every slice to honor `stop`
fn sleep_unless_stopped(total: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + total;
    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::command::testing::ScriptedRunner;
    use crate::collectors::command::CommandOutput;
    use crate::collectors::log_collector::build_log_predicate;
    use crate::collectors::topology::fixtures::plist_xml;
    use std::collections::HashMap;
    use std::sync::Arc;

    const INFO_ROOT: &str = "   Part of Whole:             disk3
   APFS Physical Store:       disk0s2
";

    const INFO_DISK0: &str = "   Device Identifier:         disk0
   Protocol:                  Apple Fabric
   Device / Media Name:       APPLE SSD AP0512Q
   Firmware Version:          555
   SMART Status:              Verified
   Internal:                  Yes
   Disk / Partition UUID:     0A1B2C3D
";

    const LIST_DISK4: &str = "/dev/disk4 (external, physical):
   #:                       TYPE NAME                    SIZE       IDENTIFIER
   0:      GUID_partition_scheme                        *2.0 TB     disk4
   1:                        EFI EFI                     209.7 MB   disk4s1
   2:                 Apple_APFS Container disk5         2.0 TB     disk4s2
";

    struct Fixture {
        _dir: tempfile::TempDir,
        mount_root: PathBuf,
        out_dir: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mount_root = dir.path().join("Volumes");
        let out_dir = dir.path().join("out");
        std::fs::create_dir_all(&mount_root).unwrap();
        Fixture {
            mount_root,
            out_dir,
            _dir: dir,
        }
    }

    fn config(fx: &Fixture) -> Config {
        let mut config = Config::default();
        config.output.dir = fx.out_dir.clone();
        config.sampling.mount_root = fx.mount_root.clone();
        config
    }

    fn host() -> HostContext {
        HostContext::new("test host", "14.5")
    }

    /// Parse a written CSV file into header-keyed rows
    fn read_rows(path: &Path) -> Vec<HashMap<String, String>> {
        let bytes = std::fs::read(path).unwrap();
        let body = bytes.strip_prefix(b"\xEF\xBB\xBF".as_slice()).unwrap();
        let mut reader = csv::Reader::from_reader(body);
        let headers = reader.headers().unwrap().clone();
        reader
            .records()
            .map(|r| {
                let record = r.unwrap();
                headers
                    .iter()
                    .zip(record.iter())
                    .map(|(h, v)| (h.to_string(), v.to_string()))
                    .collect()
            })
            .collect()
    }

    fn log_command(seconds: u64, topology: &Topology) -> String {
        format!(
            "log show --style syslog --last {}s --predicate {}",
            seconds,
            build_log_predicate(&build_relevance_tokens(topology))
        )
    }

    #[test]
    fn test_mode_properties() {
        let disk = SamplingMode::InternalDisk {
            root_mount: "/".to_string(),
        };
        let physical = SamplingMode::ExternalPhysical {
            device: DeviceId::parse("disk4").unwrap(),
        };
        assert!(!disk.is_external());
        assert!(physical.is_external());
        assert_eq!(disk.file_prefix(), "ssd_smart");
        assert_eq!(physical.file_prefix(), "external_disk");
        assert_eq!(physical.label(), "physical");
    }

    #[test]
    fn test_default_intervals_per_mode() {
        let fx = fixture();
        let runner = ScriptedRunner::new();
        let disk = Sampler::new(
            &runner,
            host(),
            config(&fx),
            SamplingMode::InternalDisk {
                root_mount: "/".to_string(),
            },
        );
        let volume = Sampler::new(
            &runner,
            host(),
            config(&fx),
            SamplingMode::ExternalVolume {
                mount_path: "/Volumes/X".to_string(),
                physical: None,
            },
        );
        assert_eq!(disk.interval_seconds(), 60);
        assert_eq!(volume.interval_seconds(), 300);
    }

    #[test]
    fn test_disk_pass_writes_health_row() {
        let fx = fixture();
        let payload = r#"{"smart_status":{"passed":true},"nvme_smart_health_information_log":{"temperature":315,"percentage_used":7,"data_units_written":1500000}}"#;
        let runner = ScriptedRunner::new()
            .on_stdout("diskutil info /", INFO_ROOT)
            .on_stdout("diskutil info disk0", INFO_DISK0)
            .on("smartctl -a -j -d nvme /dev/rdisk0", CommandOutput::new(4, payload, ""));
        let sampler = Sampler::new(
            &runner,
            host(),
            config(&fx),
            SamplingMode::InternalDisk {
                root_mount: "/".to_string(),
            },
        );

        let report = sampler.sample_once().unwrap();
        assert_eq!(report.rows, 1);
        let name = report.path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("ssd_smart_test_host_disk0_"), "{}", name);
        assert_eq!(report.lines.len(), 2);
        assert!(report.lines[1].contains("temp_c=42"));

        let rows = read_rows(&report.path);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row["disk"], "disk0");
        assert_eq!(row["device_node"], "/dev/disk0");
        assert_eq!(row["model"], "APPLE SSD AP0512Q");
        assert_eq!(row["smartctl_rc"], "4");
        assert_eq!(row["smartctl_devnode"], "/dev/rdisk0");
        assert_eq!(row["nvme_log_found"], "1");
        assert_eq!(row["smart_passed"], "1");
        assert_eq!(row["temp_c"], "42");
        assert_eq!(row["percent_used"], "7");
        assert_eq!(row["data_written_tb"], "0.768");
        assert_eq!(row["available_spare"], "");
        assert_eq!(row["sample_interval_s"], "60");
        assert!(row["smart_json"].contains("nvme_smart_health_information_log"));
    }

    #[test]
    fn test_disk_pass_with_nothing_answering() {
        let fx = fixture();
        let runner = ScriptedRunner::new();
        let sampler = Sampler::new(
            &runner,
            host(),
            config(&fx),
            SamplingMode::InternalDisk {
                root_mount: "/".to_string(),
            },
        );

        let report = sampler.sample_once().unwrap();
        assert!(report.lines.iter().any(|l| l.contains("smartctl JSON is empty")));
        let rows = read_rows(&report.path);
        assert_eq!(rows[0]["disk"], UNKNOWN_DEVICE);
        assert_eq!(rows[0]["nvme_log_found"], "0");
        assert_eq!(rows[0]["smart_passed"], "");
        assert_eq!(rows[0]["temp_c"], "");
        assert_eq!(rows[0]["smartctl_rc"], "");
    }

    #[test]
    fn test_disk_pass_header_once_across_passes() {
        let fx = fixture();
        let runner = ScriptedRunner::new();
        let sampler = Sampler::new(
            &runner,
            host(),
            config(&fx),
            SamplingMode::InternalDisk {
                root_mount: "/".to_string(),
            },
        );
        let mut path = PathBuf::new();
        for _ in 0..3 {
            path = sampler.sample_once().unwrap().path;
        }
        assert_eq!(read_rows(&path).len(), 3);
    }

    #[test]
    fn test_physical_pass_writes_row_per_volume() {
        let fx = fixture();
        let backup = fx.mount_root.join("Backup");
        let photos = fx.mount_root.join("Photos");
        std::fs::create_dir_all(&backup).unwrap();
        std::fs::create_dir_all(&photos).unwrap();
        let backup_str = backup.to_string_lossy().into_owned();
        let photos_str = photos.to_string_lossy().into_owned();

        let topology = Topology {
            physical: DeviceId::parse("disk4"),
            container: DeviceId::parse("disk5"),
            volumes: vec![
                Volume {
                    name: "Backup".to_string(),
                    mount_point: backup_str.clone(),
                    ..Volume::default()
                },
                Volume {
                    name: "Photos".to_string(),
                    mount_point: photos_str.clone(),
                    ..Volume::default()
                },
            ],
        };
        let log = "kernel: disk5s2: I/O error\nkernel: disk9: I/O error\n";

        let runner = ScriptedRunner::new()
            .on_stdout(
                "diskutil info -plist disk4",
                &plist_xml(&[("Protocol", "USB"), ("Internal", "false"), ("MediaName", "Samsung T7")]),
            )
            .on_stdout("diskutil list disk4", LIST_DISK4)
            .on_stdout(
                &format!("diskutil info -plist {}", backup_str),
                &plist_xml(&[
                    ("DeviceIdentifier", "disk5s2"),
                    ("PartOfWhole", "disk5"),
                    ("MountPoint", &backup_str),
                    ("VolumeName", "Backup"),
                    ("FilesystemType", "apfs"),
                ]),
            )
            .on_stdout(
                &format!("diskutil info -plist {}", photos_str),
                &plist_xml(&[
                    ("DeviceIdentifier", "disk5s3"),
                    ("PartOfWhole", "disk5"),
                    ("MountPoint", &photos_str),
                    ("VolumeName", "Photos"),
                ]),
            )
            .on_stdout(&log_command(300, &topology), log);

        let sampler = Sampler::new(
            &runner,
            host(),
            config(&fx),
            SamplingMode::ExternalPhysical {
                device: DeviceId::parse("disk4").unwrap(),
            },
        );
        let report = sampler.sample_once().unwrap();
        assert_eq!(report.rows, 2);
        assert!(report.lines[1].contains("mounted_vols=2"));
        assert!(report.lines[1].contains("io_error=1"));
        let name = report.path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("external_disk_test_host_disk4_"), "{}", name);

        let rows = read_rows(&report.path);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["volume_name"], "Backup");
        assert_eq!(rows[0]["volume_disk"], "disk5s2");
        assert_eq!(rows[1]["volume_name"], "Photos");
        for row in &rows {
            assert_eq!(row["mode"], "physical");
            assert_eq!(row["physical_disk"], "disk4");
            assert_eq!(row["container_disk"], "disk5");
            assert_eq!(row["present"], "1");
            assert_eq!(row["mounted"], "1");
            assert_eq!(row["protocol"], "USB");
            assert_eq!(row["device_media_name"], "Samsung T7");
            assert!(!row["total_bytes"].is_empty());
            assert_eq!(row["log_lines"], "2");
            assert_eq!(row["io_error"], "1");
            assert!(row["log_samples_json"].contains("disk5s2: I/O error"));
            assert!(row["diskutil_physical_json"].contains("Samsung T7"));
            assert_eq!(row["sample_interval_s"], "300");
        }
        let log_calls = runner
            .calls()
            .iter()
            .filter(|c| c.starts_with("log show"))
            .count();
        assert_eq!(log_calls, 1);
    }

    #[test]
    fn test_physical_pass_without_volumes_writes_placeholder() {
        let fx = fixture();
        let runner = ScriptedRunner::new();
        let sampler = Sampler::new(
            &runner,
            host(),
            config(&fx),
            SamplingMode::ExternalPhysical {
                device: DeviceId::parse("disk4").unwrap(),
            },
        );

        let report = sampler.sample_once().unwrap();
        assert_eq!(report.rows, 1);
        let rows = read_rows(&report.path);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["present"], "0");
        assert_eq!(rows[0]["mounted"], "0");
        assert_eq!(rows[0]["volume_name"], "");
        assert_eq!(rows[0]["container_disk"], "");
        assert_eq!(rows[0]["total_bytes"], "");
        assert_eq!(rows[0]["diskutil_physical_json"], "");
    }

    #[test]
    fn test_volume_pass_with_unresponsive_volume() {
        let fx = fixture();
        let photos = fx.mount_root.join("Photos");
        std::fs::create_dir_all(&photos).unwrap();
        let photos_str = photos.to_string_lossy().into_owned();

        let runner = ScriptedRunner::new();
        let sampler = Sampler::new(
            &runner,
            host(),
            config(&fx),
            SamplingMode::ExternalVolume {
                mount_path: photos_str.clone(),
                physical: None,
            },
        );

        let report = sampler.sample_once().unwrap();
        let rows = read_rows(&report.path);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["mode"], "volume");
        assert_eq!(rows[0]["volume_name"], "Photos");
        assert_eq!(rows[0]["mount_point"], photos_str);
        assert_eq!(rows[0]["present"], "0");
        assert_eq!(rows[0]["mounted"], "1");
        assert!(!rows[0]["used_pct"].is_empty());
    }

    #[test]
    fn test_volume_pass_with_physical_device() {
        let fx = fixture();
        let mount = fx.mount_root.join("iMac");
        std::fs::create_dir_all(&mount).unwrap();
        let mount_str = mount.to_string_lossy().into_owned();

        let runner = ScriptedRunner::new()
            .on_stdout(
                "diskutil info -plist disk4",
                &plist_xml(&[("Protocol", "USB"), ("RemovableMedia", "true")]),
            )
            .on_stdout(
                &format!("diskutil info -plist {}", mount_str),
                &plist_xml(&[
                    ("DeviceIdentifier", "disk6s1"),
                    ("PartOfWhole", "disk6"),
                    ("MountPoint", &mount_str),
                    ("VolumeName", "iMac"),
                    ("FilesystemType", "hfs"),
                ]),
            );
        let sampler = Sampler::new(
            &runner,
            host(),
            config(&fx),
            SamplingMode::ExternalVolume {
                mount_path: mount_str.clone(),
                physical: DeviceId::parse("disk4"),
            },
        );

        let report = sampler.sample_once().unwrap();
        let rows = read_rows(&report.path);
        assert_eq!(rows[0]["physical_disk"], "disk4");
        assert_eq!(rows[0]["container_disk"], "disk6");
        assert_eq!(rows[0]["volume_disk"], "disk6s1");
        assert_eq!(rows[0]["fs_type"], "hfs");
        assert_eq!(rows[0]["present"], "1");
        assert_eq!(rows[0]["removable"], "true");
    }

    #[test]
    fn test_unwritable_output_fails_pass() {
        let fx = fixture();
        std::fs::write(&fx.out_dir, b"not a directory").unwrap();
        let runner = ScriptedRunner::new();
        let sampler = Sampler::new(
            &runner,
            host(),
            config(&fx),
            SamplingMode::InternalDisk {
                root_mount: "/".to_string(),
            },
        );
        assert!(sampler.sample_once().is_err());
    }

    #[test]
    fn test_run_returns_promptly_when_stopped() {
        let fx = fixture();
        let runner = ScriptedRunner::new();
        let sampler = Sampler::new(
            &runner,
            host(),
            config(&fx),
            SamplingMode::InternalDisk {
                root_mount: "/".to_string(),
            },
        );

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            flag.store(true, Ordering::SeqCst);
        });

        let started = Instant::now();
        sampler.run(&stop);
        stopper.join().unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        let written: Vec<_> = std::fs::read_dir(&fx.out_dir).unwrap().collect();
        assert_eq!(written.len(), 1);
    }

    #[test]
    fn test_run_with_stop_already_raised_does_nothing() {
        let fx = fixture();
        let runner = ScriptedRunner::new();
        let sampler = Sampler::new(
            &runner,
            host(),
            config(&fx),
            SamplingMode::InternalDisk {
                root_mount: "/".to_string(),
            },
        );
        sampler.run(&AtomicBool::new(true));
        assert!(runner.calls().is_empty());
        assert!(!fx.out_dir.exists());
    }

    #[test]
    fn test_sleep_unless_stopped_honors_deadline() {
        let started = Instant::now();
        sleep_unless_stopped(Duration::from_millis(50), &AtomicBool::new(false));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
