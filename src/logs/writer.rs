use crate::config::ProcessSpec;
use crate::error::{Result, WardenError};
use chrono::Local;
use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File as TokioFile;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Timestamp format used when `time` is enabled without `log_date_format`
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Turns raw output lines into log entries
///
/// Format: `<timestamp>: <data>` when timestamps are enabled, `<data>` otherwise.
/// Every entry ends with exactly one newline.
#[derive(Debug, Clone, Default)]
pub struct LineFormatter {
    date_format: Option<String>,
}

impl LineFormatter {
    pub fn for_spec(spec: &ProcessSpec) -> Self {
        let date_format = spec.time.then(|| {
            spec.log_date_format
                .clone()
                .unwrap_or_else(|| DEFAULT_DATE_FORMAT.to_string())
        });
        Self { date_format }
    }

    pub fn with_timestamps(date_format: impl Into<String>) -> Self {
        Self {
            date_format: Some(date_format.into()),
        }
    }

    pub fn timestamps_enabled(&self) -> bool {
        self.date_format.is_some()
    }

    /// Format a log entry
    pub fn format(&self, data: &[u8]) -> Vec<u8> {
        let mut entry = Vec::with_capacity(data.len() + 32);

        if let Some(date_format) = &self.date_format {
            let now = Local::now();
            let mut prefix = String::new();
            if write!(prefix, "{}", now.format(date_format)).is_err() {
                prefix.clear();
                let _ = write!(prefix, "{}", now.format(DEFAULT_DATE_FORMAT));
            }
            entry.extend_from_slice(prefix.as_bytes());
            entry.extend_from_slice(b": ");
        }

        entry.extend_from_slice(data);

        // Ensure newline at end if not present
        if !data.ends_with(b"\n") {
            entry.push(b'\n');
        }

        entry
    }
}

/// An append-only log file
///
/// Each `write_entry` is a single locked `write_all`, so entries from
/// concurrent writers never interleave within a line.
#[derive(Debug)]
pub struct LogFile {
    path: PathBuf,
    file: Mutex<TokioFile>,
}

impl LogFile {
    /// Open (or create) a log file in append mode, creating parent directories
    pub async fn open(path: &Path) -> Result<Arc<Self>> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    WardenError::LogFileError(format!(
                        "Failed to create log directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                WardenError::LogFileError(format!("Failed to open {}: {}", path.display(), e))
            })?;

        Ok(Arc::new(Self {
            path: path.to_path_buf(),
            file: Mutex::new(TokioFile::from_std(file)),
        }))
    }

    /// Write one already-formatted entry
    pub async fn write_entry(&self, entry: &[u8]) -> Result<()> {
        let mut file = self.file.lock().await;

        file.write_all(entry).await.map_err(|e| {
            WardenError::LogFileError(format!("Failed to write to {}: {}", self.path.display(), e))
        })?;

        // Flush to ensure data is written
        file.flush().await.map_err(|e| {
            WardenError::LogFileError(format!("Failed to flush {}: {}", self.path.display(), e))
        })?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
