//! Append-only history of every action the engine takes.
//!
//! One JSON object per line in `autotidy_history.jsonl` under the app data
//! directory. The line format is a durable contract (other tools may tail or
//! parse the file), so writes are append-only and reads tolerate a file that
//! is being appended to (or was truncated mid-write).

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

pub const HISTORY_FILE_NAME: &str = "autotidy_history.jsonl";

/// Rotate the log once it grows past this size.
const MAX_LOG_BYTES: u64 = 5 * 1024 * 1024;
/// Numbered backups kept after rotation (`.1` is the newest).
const BACKUP_COUNT: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("history serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Success,
    Failure,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// Map a status to the severity used for filtering. Entries written before
/// severity existed get theirs filled in with this on read.
pub fn derive_severity(status: Status) -> Severity {
    match status {
        Status::Failure => Severity::Error,
        Status::Success => Severity::Info,
        Status::Skipped => Severity::Warning,
    }
}

/// One recorded action (or simulation, or skip). Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub original_path: String,
    pub destination_path: Option<String>,
    pub action_taken: String,
    pub status: Status,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub monitored_folder: String,
    #[serde(default)]
    pub rule_pattern: String,
    #[serde(default)]
    pub rule_age_days: u32,
    #[serde(default)]
    pub rule_use_regex: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_mtime: Option<f64>,
}

impl ActionLogEntry {
    /// Severity, derived from status when the stored entry predates the field.
    pub fn effective_severity(&self) -> Severity {
        self.severity.unwrap_or_else(|| derive_severity(self.status))
    }
}

/// Held while touching the log file; unlocks on drop.
struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

pub struct HistoryLog {
    path: PathBuf,
    lock_path: PathBuf,
    max_bytes: u64,
}

impl HistoryLog {
    /// Log living in `dir` (created if missing on first append).
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(HISTORY_FILE_NAME),
            lock_path: dir.join(format!("{HISTORY_FILE_NAME}.lock")),
            max_bytes: MAX_LOG_BYTES,
        }
    }

    /// Same log with a custom rotation threshold.
    pub fn with_max_bytes(dir: &Path, max_bytes: u64) -> Self {
        Self {
            max_bytes,
            ..Self::new(dir)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_exclusive(&self) -> std::io::Result<LockGuard> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?;
        file.lock_exclusive()?;
        Ok(LockGuard { file })
    }

    fn lock_shared(&self) -> std::io::Result<LockGuard> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?;
        file.lock_shared()?;
        Ok(LockGuard { file })
    }

    fn backup_path(&self, index: u32) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    /// Append one entry, rotating first if the file has grown past the
    /// threshold. Rotation never drops the entry being written.
    pub fn append(&self, entry: &ActionLogEntry) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let _guard = self.lock_exclusive()?;
        self.rotate_if_needed()?;

        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Shift backups `.{N-1} -> .{N}` (oldest discarded) and move the current
    /// file to `.1`. Caller holds the exclusive lock.
    fn rotate_if_needed(&self) -> std::io::Result<()> {
        let len = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(()),
        };
        if len < self.max_bytes {
            return Ok(());
        }

        let oldest = self.backup_path(BACKUP_COUNT);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (1..BACKUP_COUNT).rev() {
            let from = self.backup_path(index);
            if from.exists() {
                fs::rename(&from, self.backup_path(index + 1))?;
            }
        }
        fs::rename(&self.path, self.backup_path(1))?;
        log::info!("Rotated history log ({len} bytes)");
        Ok(())
    }

    /// All parseable entries, oldest first. Malformed lines are skipped; an
    /// unterminated trailing line (concurrent append) is ignored.
    pub fn read_entries(&self) -> Result<Vec<ActionLogEntry>, HistoryError> {
        let _guard = self.lock_shared()?;
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut entries = Vec::new();
        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = reader.read_until(b'\n', &mut buf)?;
            if read == 0 {
                break;
            }
            if buf.last() != Some(&b'\n') {
                // Incomplete tail: a writer is mid-append.
                break;
            }
            match serde_json::from_slice::<ActionLogEntry>(&buf) {
                Ok(mut entry) => {
                    if entry.severity.is_none() {
                        entry.severity = Some(derive_severity(entry.status));
                    }
                    entries.push(entry);
                }
                Err(err) => {
                    log::debug!("Skipping malformed history line: {err}");
                }
            }
        }
        Ok(entries)
    }

    /// Rewrite the log without entries older than `max_age_days`. Lines that
    /// cannot be parsed (or carry no parsable timestamp) are retained rather
    /// than discarded. Returns the number of entries removed.
    pub fn prune(&self, max_age_days: u32) -> Result<usize, HistoryError> {
        let _guard = self.lock_exclusive()?;
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let cutoff = Utc::now() - Duration::days(max_age_days as i64);
        let mut kept: Vec<u8> = Vec::new();
        let mut removed = 0usize;
        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = reader.read_until(b'\n', &mut buf)?;
            if read == 0 {
                break;
            }
            if line_is_older_than(&buf, cutoff) {
                removed += 1;
            } else {
                kept.extend_from_slice(&buf);
            }
        }

        if removed > 0 {
            // Temp-and-rename so a crash mid-rewrite cannot lose the log.
            let tmp_path = self.path.with_extension("jsonl.tmp");
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&kept)?;
            tmp.sync_all()?;
            fs::rename(&tmp_path, &self.path)?;
            log::info!("Pruned {removed} history entries older than {max_age_days} days");
        }
        Ok(removed)
    }
}

fn line_is_older_than(line: &[u8], cutoff: DateTime<Utc>) -> bool {
    let value: serde_json::Value = match serde_json::from_slice(line) {
        Ok(value) => value,
        Err(_) => return false,
    };
    let Some(raw) = value.get("timestamp").and_then(|t| t.as_str()) else {
        return false;
    };
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => ts.with_timezone(&Utc) < cutoff,
        Err(_) => false,
    }
}
