//! Undo: read the history log, group entries into runs, and reverse MOVED or
//! COPIED actions, one at a time or a whole run as a batch.
//!
//! Deletions, simulations and prior undos are not reversible here; attempting
//! one fails with an explicit message rather than guessing.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::executor::{move_file, ActionOutcome};
use crate::history::{derive_severity, ActionLogEntry, HistoryError, HistoryLog, Status};

/// One scan cycle as seen in the history log.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub start_time: DateTime<Utc>,
    pub action_count: usize,
}

#[derive(Debug, Default)]
pub struct BatchUndoReport {
    pub success_count: usize,
    pub failure_count: usize,
    pub messages: Vec<String>,
}

pub struct UndoEngine<'a> {
    history: &'a HistoryLog,
}

impl<'a> UndoEngine<'a> {
    pub fn new(history: &'a HistoryLog) -> Self {
        Self { history }
    }

    /// All runs present in the log, most recent first.
    pub fn list_runs(&self) -> Result<Vec<RunSummary>, HistoryError> {
        let entries = self.history.read_entries()?;
        let mut grouped: HashMap<String, (DateTime<Utc>, usize)> = HashMap::new();
        for entry in &entries {
            grouped
                .entry(entry.run_id.clone())
                .and_modify(|(start, count)| {
                    if entry.timestamp < *start {
                        *start = entry.timestamp;
                    }
                    *count += 1;
                })
                .or_insert((entry.timestamp, 1));
        }

        let mut runs: Vec<RunSummary> = grouped
            .into_iter()
            .map(|(run_id, (start_time, action_count))| RunSummary {
                run_id,
                start_time,
                action_count,
            })
            .collect();
        runs.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(runs)
    }

    /// A run's entries in chronological order.
    pub fn run_actions(&self, run_id: &str) -> Result<Vec<ActionLogEntry>, HistoryError> {
        let mut actions: Vec<ActionLogEntry> = self
            .history
            .read_entries()?
            .into_iter()
            .filter(|entry| entry.run_id == run_id)
            .collect();
        actions.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(actions)
    }

    /// Reverse a single history entry.
    pub fn undo_action(&self, entry: &ActionLogEntry) -> ActionOutcome {
        match entry.action_taken.as_str() {
            "MOVED" => self.undo_move(entry),
            "COPIED" => self.undo_copy(entry),
            other => ActionOutcome::fail(format!(
                "Undo is not supported for action '{other}'"
            )),
        }
    }

    fn undo_move(&self, entry: &ActionLogEntry) -> ActionOutcome {
        let Some(dest) = entry.destination_path.as_deref() else {
            return ActionOutcome::fail(
                "Cannot undo: no destination path was recorded".to_string(),
            );
        };
        let dest = Path::new(dest);
        let original = Path::new(&entry.original_path);

        if !dest.is_file() {
            return ActionOutcome::fail(format!(
                "Cannot undo: archived file '{}' does not exist",
                dest.display()
            ));
        }
        // Never overwrite whatever now occupies the original path.
        if original.exists() {
            return ActionOutcome::fail(format!(
                "Cannot undo: a file already exists at the original path '{}'",
                original.display()
            ));
        }

        if let Some(parent) = original.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                let message = format!(
                    "Error during undo: could not create '{}': {err}",
                    parent.display()
                );
                self.log_undo(entry, "UNDO_MOVE", Status::Failure, &message);
                return ActionOutcome::fail(message);
            }
        }

        match move_file(dest, original) {
            Ok(()) => {
                let message = format!(
                    "Moved '{}' back to '{}'",
                    dest.display(),
                    original.display()
                );
                self.log_undo(entry, "UNDO_MOVE", Status::Success, &message);
                ActionOutcome::ok(message)
            }
            Err(err) => {
                let message = format!("Error during undo move: {err}");
                self.log_undo(entry, "UNDO_MOVE", Status::Failure, &message);
                ActionOutcome::fail(message)
            }
        }
    }

    fn undo_copy(&self, entry: &ActionLogEntry) -> ActionOutcome {
        let Some(dest) = entry.destination_path.as_deref() else {
            return ActionOutcome::fail(
                "Cannot undo: no destination path was recorded".to_string(),
            );
        };
        let dest = Path::new(dest);

        if !dest.is_file() {
            return ActionOutcome::fail(format!(
                "Cannot undo: copied file '{}' does not exist",
                dest.display()
            ));
        }

        // When the copy's size was recorded, refuse to delete a file that no
        // longer matches it; something else may live there now.
        if let Some(expected) = entry.copy_size {
            let actual = match fs::metadata(dest) {
                Ok(meta) => meta.len(),
                Err(err) => {
                    return ActionOutcome::fail(format!(
                        "Cannot undo: could not stat '{}': {err}",
                        dest.display()
                    ));
                }
            };
            if actual != expected {
                return ActionOutcome::fail(format!(
                    "Cannot undo: size mismatch for '{}' (expected {expected} bytes, found {actual})",
                    dest.display()
                ));
            }
        }

        match fs::remove_file(dest) {
            Ok(()) => {
                let message = format!("Deleted copy '{}'", dest.display());
                self.log_undo(entry, "UNDO_COPY", Status::Success, &message);
                ActionOutcome::ok(message)
            }
            Err(err) => {
                let message = format!("Error during undo copy: {err}");
                self.log_undo(entry, "UNDO_COPY", Status::Failure, &message);
                ActionOutcome::fail(message)
            }
        }
    }

    /// Undo every reversible action of a run, last-performed first. Failures
    /// do not stop the batch; the report carries both counts and every
    /// per-action message.
    pub fn undo_batch(&self, run_id: &str) -> BatchUndoReport {
        let mut report = BatchUndoReport::default();

        let actions = match self.run_actions(run_id) {
            Ok(actions) => actions,
            Err(err) => {
                report.messages.push(format!("Could not read history: {err}"));
                return report;
            }
        };

        for entry in actions.iter().rev().filter(|e| is_undoable(e)) {
            let outcome = self.undo_action(entry);
            if outcome.success {
                report.success_count += 1;
            } else {
                report.failure_count += 1;
            }
            report.messages.push(outcome.message);
        }
        report
    }

    fn log_undo(&self, original: &ActionLogEntry, action: &str, status: Status, details: &str) {
        let entry = ActionLogEntry {
            timestamp: Utc::now(),
            run_id: original.run_id.clone(),
            // The archived file is what this action operates on; it lands
            // back at the original action's source path.
            original_path: original.destination_path.clone().unwrap_or_default(),
            destination_path: Some(original.original_path.clone()),
            action_taken: action.to_string(),
            status,
            severity: Some(derive_severity(status)),
            details: format!(
                "Undo of action from {}: {details}",
                original.timestamp.to_rfc3339()
            ),
            monitored_folder: original.monitored_folder.clone(),
            rule_pattern: original.rule_pattern.clone(),
            rule_age_days: original.rule_age_days,
            rule_use_regex: original.rule_use_regex,
            copy_size: None,
            copy_mtime: None,
        };
        if let Err(err) = self.history.append(&entry) {
            log::warn!("Could not record undo in history: {err}");
        }
    }
}

fn is_undoable(entry: &ActionLogEntry) -> bool {
    entry.status == Status::Success
        && matches!(entry.action_taken.as_str(), "MOVED" | "COPIED")
}
