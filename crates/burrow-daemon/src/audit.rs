//! Append-only daily audit log.
//!
//! One file per UTC day, `audit/YYYY-MM-DD.log`, one line per access
//! decision:
//!
//! ```text
//! 2026-10-19T08:15:02.113Z contact 3b6a...  denied
//! ```

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::ConfigError;

/// Daily audit log under a directory.
#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    /// Log writing into `dir`, created if missing.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| ConfigError::Io { path: dir.clone(), source })?;
        Ok(Self { dir })
    }

    /// Directory holding the daily files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File for the day of `at`.
    pub fn file_for(&self, at: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!("{}.log", at.format("%Y-%m-%d")))
    }

    /// Append a decision stamped now.
    pub fn record(&self, subject: &str, id: &str, allowed: bool) -> Result<(), ConfigError> {
        self.record_at(Utc::now(), subject, id, allowed)
    }

    /// Append a decision stamped `at`.
    pub fn record_at(
        &self,
        at: DateTime<Utc>,
        subject: &str,
        id: &str,
        allowed: bool,
    ) -> Result<(), ConfigError> {
        let path = self.file_for(at);
        let line = format!(
            "{} {subject} {id} {}\n",
            at.to_rfc3339_opts(SecondsFormat::Millis, true),
            if allowed { "allowed" } else { "denied" }
        );

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| ConfigError::Io { path: path.clone(), source })?;
        file.write_all(line.as_bytes()).map_err(|source| ConfigError::Io { path, source })
    }
}
