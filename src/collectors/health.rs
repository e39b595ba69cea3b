//! Disk health extraction from `smartctl` JSON output
//!
//! The tool's invocation and payload layout both vary by transport (NVMe,
//! SATA, USB bridges) and version, so querying is an exhaustive fallback over
//! device nodes and modes, and extraction searches the payload tree instead of
//! trusting fixed key paths.

use crate::collectors::command::CommandRunner;
use crate::error::CollectorError;
use crate::records::{DeviceId, HealthMetrics};
use log::{debug, warn};
use serde_json::{Map, Value};

const SMARTCTL: &str = "smartctl";

/// Query modes tried in order: protocol specific first, generic second
const QUERY_MODES: [&[&str]; 2] = [&["-a", "-j", "-d", "nvme"], &["-a", "-j"]];

/// Well-known names for the NVMe health log across smartctl versions
const HEALTH_LOG_KEYS: [&str; 3] = [
    "nvme_smart_health_information_log",
    "nvme_smart_health_information",
    "nvme_smart_health_log",
];

/// Keys that, next to `temperature`, identify a health log during the tree search
const HEALTH_LOG_MARKERS: [&str; 3] = ["percentage_used", "data_units_written", "available_spare"];

/// Maximum nesting depth explored by the health log search
const MAX_SEARCH_DEPTH: usize = 64;

/// Maximum number of nodes visited by the health log search
const MAX_VISITED_NODES: usize = 10_000;

/// Bytes per NVMe "data unit" (1000 sectors of 512 bytes)
pub const DATA_UNIT_BYTES: f64 = 512_000.0;

/// Outcome of the query fallback chain
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawHealthQuery {
    /// First successfully parsed payload
    pub payload: Option<Value>,
    /// Exit status of the returning (or last) attempt
    pub exit_status: Option<i32>,
    pub error_text: String,
    /// Device node used by the returning (or last) attempt
    pub device_node: String,
}

/// Runs `smartctl` against a whole disk and normalizes its health counters
pub struct HealthExtractor<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> HealthExtractor<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Try every device node / query mode combination until one parses
    ///
    /// Exit status is ignored for the purpose of parsing: smartctl sets status
    /// bits for warnings while still printing a complete JSON document.
    pub fn query_raw_health(&self, device: Option<&DeviceId>) -> RawHealthQuery {
        let Some(device) = device else {
            return RawHealthQuery::default();
        };

        let mut last = RawHealthQuery::default();
        for node in [device.raw_node(), device.block_node()] {
            for mode in QUERY_MODES {
                let mut args: Vec<&str> = mode.to_vec();
                args.push(&node);

                let output = self.runner.run(SMARTCTL, &args);
                last = RawHealthQuery {
                    payload: None,
                    exit_status: Some(output.status),
                    error_text: output.stderr.trim().to_string(),
                    device_node: node.clone(),
                };

                match parse_health_payload(&output.stdout_text()) {
                    Ok(payload) => {
                        debug!(
                            "smartctl {:?} produced a payload (status {})",
                            args, output.status
                        );
                        last.payload = Some(payload);
                        return last;
                    }
                    Err(e) => debug!("smartctl {:?} unusable: {}", args, e),
                }
            }
        }

        warn!(
            "No parseable smartctl output for {} (last status {:?}: {})",
            device, last.exit_status, last.error_text
        );
        last
    }

    /// Query and normalize in one step
    pub fn extract(&self, device: Option<&DeviceId>) -> (HealthMetrics, RawHealthQuery) {
        let query = self.query_raw_health(device);
        let metrics = extract_metrics(query.payload.as_ref());
        (metrics, query)
    }
}

/// Parse tool stdout as a JSON object
pub fn parse_health_payload(stdout: &str) -> Result<Value, CollectorError> {
    let text = stdout.trim_start();
    if !text.starts_with('{') {
        return Err(CollectorError::ParseError(
            "output is not a JSON object".to_string(),
        ));
    }
    serde_json::from_str::<Value>(text)
        .map_err(|e| CollectorError::ParseError(e.to_string()))
        .and_then(|v| {
            if v.is_object() {
                Ok(v)
            } else {
                Err(CollectorError::ParseError("payload root is not an object".to_string()))
            }
        })
}

/// Find the NVMe health log inside an arbitrary payload
///
/// Known key names are checked first; otherwise the tree is walked depth first
/// with an explicit stack, bounded by depth and by visited node count.
pub fn locate_health_log(payload: &Value) -> Option<&Map<String, Value>> {
    if let Some(root) = payload.as_object() {
        for key in HEALTH_LOG_KEYS {
            if let Some(log) = root.get(key).and_then(Value::as_object) {
                return Some(log);
            }
        }
    }

    let mut stack: Vec<(&Value, usize)> = vec![(payload, 0)];
    let mut visited = 0usize;
    while let Some((node, depth)) = stack.pop() {
        visited += 1;
        if visited > MAX_VISITED_NODES {
            warn!("Health log search stopped after {} nodes", MAX_VISITED_NODES);
            return None;
        }

        let children: Box<dyn Iterator<Item = &Value> + '_> = match node {
            Value::Object(map) => {
                if looks_like_health_log(map) {
                    return Some(map);
                }
                Box::new(map.values())
            }
            Value::Array(items) => Box::new(items.iter()),
            _ => continue,
        };

        if depth >= MAX_SEARCH_DEPTH {
            continue;
        }
        stack.extend(
            children
                .filter(|child| child.is_object() || child.is_array())
                .map(|child| (child, depth + 1)),
        );
    }
    None
}

fn looks_like_health_log(map: &Map<String, Value>) -> bool {
    map.contains_key("temperature") && HEALTH_LOG_MARKERS.iter().any(|k| map.contains_key(*k))
}

/// Tolerant integer coercion for a health field
///
/// Accepts numbers (floats truncate), booleans as 0/1, `{"current": n}` or
/// `{"value": n}`, and digit strings with an optional `%`.
pub fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Number(n) => number_to_i64(n),
        Value::Object(map) => ["current", "value"]
            .iter()
            .find_map(|k| match map.get(*k) {
                Some(Value::Number(n)) => Some(n),
                _ => None,
            })
            .and_then(number_to_i64),
        Value::String(s) => {
            let stripped = s.replace('%', "");
            let digits = stripped.trim();
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                digits.parse().ok()
            } else {
                None
            }
        }
        Value::Null | Value::Array(_) => None,
    }
}

fn number_to_i64(n: &serde_json::Number) -> Option<i64> {
    n.as_i64()
        .or_else(|| n.as_u64().map(|u| i64::try_from(u).unwrap_or(i64::MAX)))
        .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
}

/// Convert a temperature that looks like Kelvin into Celsius
///
/// Any reading in 200..=500 is treated as Kelvin; there is no unit field to
/// confirm it.
pub fn normalize_temp_c(temp: i64) -> i64 {
    if (200..=500).contains(&temp) {
        temp - 273
    } else {
        temp
    }
}

/// NVMe data units to terabytes, rounded to 3 decimal places
pub fn data_units_to_tb(units: i64) -> f64 {
    let tb = units as f64 * DATA_UNIT_BYTES / 1e12;
    (tb * 1000.0).round() / 1000.0
}

/// Build the metric record from a raw health log
pub fn normalize_metrics(log: &Map<String, Value>) -> HealthMetrics {
    let field = |key: &str| log.get(key).and_then(coerce_int);

    let data_units_read = field("data_units_read");
    let data_units_written = field("data_units_written");

    HealthMetrics {
        nvme_log_found: true,
        temp_c: field("temperature").map(normalize_temp_c),
        percent_used: field("percentage_used"),
        available_spare: field("available_spare"),
        available_spare_threshold: field("available_spare_threshold"),
        data_units_read,
        data_units_written,
        data_read_tb: data_units_read.map(data_units_to_tb),
        data_written_tb: data_units_written.map(data_units_to_tb),
        power_on_hours: field("power_on_hours"),
        power_cycles: field("power_cycles"),
        unsafe_shutdowns: field("unsafe_shutdowns"),
        media_errors: field("media_errors"),
        num_err_log_entries: field("num_err_log_entries"),
        warning_temp_time: field("warning_temp_time"),
        critical_comp_time: field("critical_comp_time"),
        ..HealthMetrics::default()
    }
}

/// Full extraction from an optional payload; never fails
///
/// No payload, or a payload without a recognizable health log, yields
/// `nvme_log_found == false` and empty counters.
pub fn extract_metrics(payload: Option<&Value>) -> HealthMetrics {
    let Some(payload) = payload else {
        return HealthMetrics::default();
    };

    let mut metrics = match locate_health_log(payload) {
        Some(log) => normalize_metrics(log),
        None => HealthMetrics::default(),
    };
    metrics.smart_passed = payload
        .get("smart_status")
        .and_then(|s| s.get("passed"))
        .and_then(Value::as_bool);
    metrics.raw_payload = payload.to_string();
    metrics
}
