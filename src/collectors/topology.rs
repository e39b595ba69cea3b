use crate::collectors::command::CommandRunner;
use crate::error::CollectorError;
use crate::records::{DeviceId, DiskInfo, PhysicalInfo, Volume};
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, warn};
use regex::Regex;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

const DISKUTIL: &str = "diskutil";

/// Resolves physical disk, APFS container and mounted volumes via `diskutil`
///
/// Nothing is cached: removable media can come and go between passes, so every
/// call goes back to the tool. Any failed query degrades to `None`/empty for
/// that entity only.
pub struct TopologyResolver<'a> {
    runner: &'a dyn CommandRunner,
    /// Directory whose children are the user-visible mount points (`/Volumes`)
    mount_root: PathBuf,
}

impl<'a> TopologyResolver<'a> {
    pub fn new(runner: &'a dyn CommandRunner, mount_root: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            mount_root: mount_root.into(),
        }
    }

    /// Find the whole physical disk backing `mount_path`
    ///
    /// Prefers the APFS physical store, falling back to `Part of Whole`.
    /// Returns `None` (written as UNKNOWN) when neither is reported or the query fails.
    pub fn resolve_physical_device_for_mount(&self, mount_path: &str) -> Option<DeviceId> {
        let output = self.runner.run(DISKUTIL, &["info", mount_path]);
        if !output.success() {
            warn!(
                "diskutil info {} failed with status {}: {}",
                mount_path,
                output.status,
                output.stderr.trim()
            );
            return None;
        }
        let device = parse_physical_store(&output.stdout_text());
        debug!("Mount {} resolved to physical device {:?}", mount_path, device);
        device
    }

    /// Human-readable identity fields for a whole disk
    pub fn disk_info(&self, device: Option<&DeviceId>) -> DiskInfo {
        let Some(device) = device else {
            return DiskInfo::default();
        };

        let mut info = DiskInfo {
            device_node: device.block_node(),
            ..DiskInfo::default()
        };

        let output = self.runner.run(DISKUTIL, &["info", device.as_str()]);
        if !output.success() {
            warn!("diskutil info {} failed: {}", device, output.stderr.trim());
            return info;
        }

        let text = output.stdout_text();
        info.protocol = grab_field(&text, "Protocol");
        info.model = Some(grab_field(&text, "Device / Media Name"))
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| grab_field(&text, "Media Name"));
        info.firmware = grab_field(&text, "Firmware Version");
        info.smart_status = grab_field(&text, "SMART Status");
        info.internal = grab_field(&text, "Internal");
        // True serials are rarely exposed; the partition UUID is the stable stand-in
        info.serial = grab_field(&text, "Disk / Partition UUID");
        info
    }

    /// Structured identity of a physical device, `None` when it does not answer
    pub fn physical_info(&self, device: &DeviceId) -> Option<PhysicalInfo> {
        let dict = self.info_plist(device.as_str())?;
        Some(PhysicalInfo {
            protocol: plist_text(&dict, "Protocol"),
            internal: plist_text(&dict, "Internal"),
            removable: plist_text(&dict, "RemovableMedia"),
            ejectable: plist_text(&dict, "Ejectable"),
            media_name: plist_text(&dict, "MediaName"),
            raw_json: plist_to_json(&plist::Value::Dictionary(dict)).to_string(),
        })
    }

    /// Find the APFS container hosted on `device` by reading its partition map
    pub fn resolve_container_for_device(&self, device: &DeviceId) -> Option<DeviceId> {
        let output = self.runner.run(DISKUTIL, &["list", device.as_str()]);
        if !output.success() {
            warn!("diskutil list {} failed: {}", device, output.stderr.trim());
            return None;
        }
        let container = parse_container(&output.stdout_text());
        debug!("Device {} hosts container {:?}", device, container);
        container
    }

    /// Enumerate live mount points that belong to `container`
    ///
    /// A mount is accepted when its `PartOfWhole` is the container or its own
    /// identifier is a slice of it. Results are unique per mount point.
    pub fn scan_volumes_for_container(&self, container: &DeviceId) -> Vec<Volume> {
        let entries = match std::fs::read_dir(&self.mount_root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot list {}: {}", self.mount_root.display(), e);
                return Vec::new();
            }
        };

        let mut by_mount: BTreeMap<String, Volume> = BTreeMap::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.is_empty() || name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let path_str = path.to_string_lossy().into_owned();

            let Some(dict) = self.info_plist(&path_str) else {
                debug!("No disk info for {}, skipping", path_str);
                continue;
            };

            let device_id = plist_text(&dict, "DeviceIdentifier");
            let part_of_whole = DeviceId::parse(&plist_text(&dict, "PartOfWhole"));
            if part_of_whole.as_ref() != Some(container) && !container.owns_slice(&device_id) {
                continue;
            }

            let mount_point = Some(plist_text(&dict, "MountPoint"))
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| path_str.clone());
            if !Path::new(&mount_point).starts_with(&self.mount_root) {
                continue;
            }

            let volume = Volume {
                name: Some(plist_text(&dict, "VolumeName"))
                    .filter(|n| !n.is_empty())
                    .unwrap_or(name),
                device_id,
                mount_point: mount_point.clone(),
                fs_type: plist_text(&dict, "FilesystemType"),
                uuid: plist_text(&dict, "VolumeUUID"),
            };
            by_mount.insert(mount_point, volume);
        }

        by_mount.into_values().collect()
    }

    /// Resolve a single explicitly named mount path
    ///
    /// When the path does not answer, a placeholder volume named after the
    /// path's last component is returned with no container.
    pub fn volume_for_mount(&self, mount_path: &str) -> (Volume, Option<DeviceId>) {
        match self.info_plist(mount_path) {
            Some(dict) => {
                let container = DeviceId::parse(&plist_text(&dict, "PartOfWhole"));
                let volume = Volume {
                    name: plist_text(&dict, "VolumeName"),
                    device_id: plist_text(&dict, "DeviceIdentifier"),
                    mount_point: Some(plist_text(&dict, "MountPoint"))
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| mount_path.to_string()),
                    fs_type: plist_text(&dict, "FilesystemType"),
                    uuid: plist_text(&dict, "VolumeUUID"),
                };
                (volume, container)
            }
            None => {
                let volume = Volume {
                    name: mount_basename(mount_path),
                    mount_point: mount_path.to_string(),
                    ..Volume::default()
                };
                (volume, None)
            }
        }
    }

    /// Whether the volume's mount point is a live directory under the mount root
    pub fn is_mounted(&self, volume: &Volume) -> bool {
        if volume.mount_point.is_empty() {
            return false;
        }
        let path = Path::new(&volume.mount_point);
        path.starts_with(&self.mount_root) && path.is_dir()
    }

    fn info_plist(&self, target: &str) -> Option<plist::Dictionary> {
        let output = self.runner.run(DISKUTIL, &["info", "-plist", target]);
        if !output.success() || output.stdout.is_empty() {
            debug!("diskutil info -plist {} returned status {}", target, output.status);
            return None;
        }
        match parse_plist_dictionary(&output.stdout) {
            Ok(dict) => Some(dict),
            Err(e) => {
                warn!("Unparseable disk info for {}: {}", target, e);
                None
            }
        }
    }
}

/// Last path component of a mount path, ignoring trailing slashes
pub fn mount_basename(mount_path: &str) -> String {
    mount_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Extract the whole disk from `diskutil info` text
pub fn parse_physical_store(text: &str) -> Option<DeviceId> {
    let mut physical_store = None;
    let mut part_of_whole = None;

    for line in text.lines() {
        let line = line.trim();
        if let Some(value) = line
            .strip_prefix("APFS Physical Store:")
            .or_else(|| line.strip_prefix("Physical Store:"))
        {
            physical_store = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("Part of Whole:") {
            part_of_whole = Some(value.trim().to_string());
        }
    }

    physical_store
        .as_deref()
        .and_then(DeviceId::parse)
        .or_else(|| part_of_whole.as_deref().and_then(DeviceId::parse))
}

/// Extract the APFS container identifier from `diskutil list <disk>` text
pub fn parse_container(text: &str) -> Option<DeviceId> {
    static APFS: OnceLock<Regex> = OnceLock::new();
    static ANY: OnceLock<Regex> = OnceLock::new();
    let apfs = APFS.get_or_init(|| {
        Regex::new(r"Apple_APFS\s+Container\s+(disk\d+)").expect("static regex")
    });
    let any = ANY.get_or_init(|| Regex::new(r"Container\s+(disk\d+)").expect("static regex"));

    apfs.captures(text)
        .or_else(|| any.captures(text))
        .and_then(|caps| caps.get(1))
        .and_then(|m| DeviceId::parse(m.as_str()))
}

fn grab_field(text: &str, key: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| line.starts_with(key))
        .and_then(|line| line.split_once(':'))
        .map(|(_, value)| value.trim().to_string())
        .unwrap_or_default()
}

/// Parse `diskutil ... -plist` output into its top-level dictionary
pub fn parse_plist_dictionary(bytes: &[u8]) -> Result<plist::Dictionary, CollectorError> {
    plist::Value::from_reader(Cursor::new(bytes))
        .map_err(|e| CollectorError::ParseError(format!("plist: {}", e)))?
        .into_dictionary()
        .ok_or_else(|| CollectorError::ParseError("plist root is not a dictionary".to_string()))
}

/// Scalar plist value rendered as text; missing or compound values become empty
fn plist_text(dict: &plist::Dictionary, key: &str) -> String {
    match dict.get(key) {
        Some(plist::Value::String(s)) => s.clone(),
        Some(plist::Value::Boolean(b)) => b.to_string(),
        Some(plist::Value::Integer(i)) => i.to_string(),
        Some(plist::Value::Real(r)) => r.to_string(),
        _ => String::new(),
    }
}

/// Convert a plist tree into JSON for the raw-payload column
pub fn plist_to_json(value: &plist::Value) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        plist::Value::Dictionary(dict) => Json::Object(
            dict.iter()
                .map(|(k, v)| (k.clone(), plist_to_json(v)))
                .collect(),
        ),
        plist::Value::Array(items) => Json::Array(items.iter().map(plist_to_json).collect()),
        plist::Value::Boolean(b) => Json::Bool(*b),
        plist::Value::Integer(i) => i
            .as_signed()
            .map(Json::from)
            .or_else(|| i.as_unsigned().map(Json::from))
            .unwrap_or(Json::Null),
        plist::Value::Real(r) => serde_json::Number::from_f64(*r)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        plist::Value::String(s) => Json::String(s.clone()),
        plist::Value::Date(date) => {
            let time: DateTime<Utc> = SystemTime::from(*date).into();
            Json::String(time.to_rfc3339_opts(SecondsFormat::Secs, true))
        }
        plist::Value::Data(bytes) => Json::String(format!("<{} bytes>", bytes.len())),
        plist::Value::Uid(uid) => Json::from(uid.get()),
        _ => Json::Null,
    }
}
