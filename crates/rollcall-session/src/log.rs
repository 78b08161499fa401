//! Append-only attendance CSV: `name,YYYY-MM-DD HH:MM:SS`, no header.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Timestamp layout of the second column (local time, no zone).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum LogError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: csv::Error },
    #[error("{path}: malformed row: {source}")]
    Malformed { path: PathBuf, source: csv::Error },
}

impl LogError {
    /// 1-based line of a malformed row, when known.
    pub fn line(&self) -> Option<u64> {
        match self {
            LogError::Malformed { source, .. } => source.position().map(|p| p.line()),
            _ => None,
        }
    }
}

/// One attendance row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub name: String,
    #[serde(with = "timestamp")]
    pub timestamp: NaiveDateTime,
}

mod timestamp {
    use super::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&ts.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let text = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(text.trim(), TIMESTAMP_FORMAT)
            .map_err(serde::de::Error::custom)
    }
}

/// Handle to the attendance file. The file is opened per write, never held open.
#[derive(Debug, Clone)]
pub struct AttendanceLog {
    path: PathBuf,
}

impl AttendanceLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row, creating the file if needed.
    pub fn append(&self, record: &AttendanceRecord) -> Result<(), LogError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| LogError::Open { path: self.path.clone(), source })?;

        let write_err = |source: csv::Error| LogError::Write { path: self.path.clone(), source };

        // The writer buffers the row; flush emits it in one write.
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer.serialize(record).map_err(write_err)?;
        writer.flush().map_err(|e| write_err(e.into()))?;

        tracing::debug!(
            path = %self.path.display(),
            name = %record.name,
            "attendance row appended"
        );
        Ok(())
    }

    /// Read every row back. A missing file has no rows.
    pub fn records(&self) -> Result<Vec<AttendanceRecord>, LogError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(LogError::Open { path: self.path.clone(), source }),
        };

        csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(file)
            .deserialize()
            .map(|row| {
                row.map_err(|source| LogError::Malformed {
                    path: self.path.clone(),
                    source,
                })
            })
            .collect()
    }

    /// Rows whose timestamp falls on `date`.
    pub fn records_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, LogError> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|r| r.timestamp.date() == date)
            .collect())
    }
}
