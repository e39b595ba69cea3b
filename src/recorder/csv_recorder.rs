use crate::error::RecorderError;
use chrono::{Local, NaiveDate};
use log::debug;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// UTF-8 byte-order mark written once at the head of every file
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Append-only, day-partitioned CSV writer
///
/// Each (host, entity, day) maps to one file. The header is written exactly
/// once, when the file is empty; every call appends one row and closes the
/// file again.
#[derive(Debug, Clone)]
pub struct TelemetryRecorder {
    out_dir: PathBuf,
    prefix: String,
}

impl TelemetryRecorder {
    /// # Arguments
    ///
    /// * `out_dir` - Directory receiving the CSV files
    /// * `prefix` - File name prefix, e.g. `ssd_smart`
    pub fn new(out_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            out_dir: out_dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Create the output directory and prove it accepts new files
    ///
    /// # Errors
    ///
    /// `RecorderError::CreateDir` or `RecorderError::NotWritable`.
    pub fn ensure_writable(&self) -> Result<(), RecorderError> {
        std::fs::create_dir_all(&self.out_dir).map_err(|source| RecorderError::CreateDir {
            path: self.out_dir.clone(),
            source,
        })?;

        let probe = self
            .out_dir
            .join(format!(".{}_write_probe_{}", self.prefix, std::process::id()));
        let created = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&probe)
            .and_then(|mut f| f.write_all(b"ok"));
        let _ = std::fs::remove_file(&probe);
        created.map_err(|_| RecorderError::NotWritable(self.out_dir.clone()))
    }

    /// File path for `host`/`entity` on `day`
    pub fn path_for(&self, host: &str, entity: &str, day: NaiveDate) -> PathBuf {
        self.out_dir.join(format!(
            "{}_{}_{}_{}.csv",
            self.prefix,
            sanitize_name(host),
            sanitize_name(entity),
            day.format("%Y-%m-%d")
        ))
    }

    /// Append one row to today's file
    pub fn append<R: Serialize>(
        &self,
        host: &str,
        entity: &str,
        row: &R,
    ) -> Result<PathBuf, RecorderError> {
        self.append_rows_on(Local::now().date_naive(), host, entity, std::slice::from_ref(row))
    }

    /// Append several rows to today's file in one open/close
    pub fn append_rows<R: Serialize>(
        &self,
        host: &str,
        entity: &str,
        rows: &[R],
    ) -> Result<PathBuf, RecorderError> {
        self.append_rows_on(Local::now().date_naive(), host, entity, rows)
    }

    /// Append rows to the file for an explicit day
    ///
    /// All rows are serialized into memory first, so a serialization failure
    /// leaves the file untouched.
    pub fn append_rows_on<R: Serialize>(
        &self,
        day: NaiveDate,
        host: &str,
        entity: &str,
        rows: &[R],
    ) -> Result<PathBuf, RecorderError> {
        std::fs::create_dir_all(&self.out_dir).map_err(|source| RecorderError::CreateDir {
            path: self.out_dir.clone(),
            source,
        })?;

        let path = self.path_for(host, entity, day);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let needs_header = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(Vec::new());
        for row in rows {
            writer.serialize(row)?;
        }
        let encoded = writer
            .into_inner()
            .map_err(|e| RecorderError::IoError(e.into_error()))?;

        let mut buffer = Vec::with_capacity(encoded.len() + UTF8_BOM.len());
        if needs_header && !encoded.is_empty() {
            buffer.extend_from_slice(UTF8_BOM);
        }
        buffer.extend_from_slice(&encoded);
        file.write_all(&buffer)?;
        file.flush()?;

        debug!("Appended {} row(s) to {}", rows.len(), path.display());
        Ok(path)
    }
}

/// Replace every character that is not alphanumeric, `-` or `_` with `_`
///
/// Non-ASCII letters and digits are kept, so host names differing only in
/// them still map to distinct files.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
