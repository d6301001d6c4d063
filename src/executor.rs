//! Action execution: resolve where a matched file goes, claim a free
//! destination name, perform the move/copy/delete, and record exactly one
//! history entry per attempt, dry-run included.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use chrono::{Local, Utc};
use filetime::FileTime;

use crate::config::{Rule, RuleAction, DEFAULT_ARCHIVE_TEMPLATE};
use crate::history::{derive_severity, ActionLogEntry, HistoryLog, Status};

/// Numbered probes tried before falling back to a timestamp suffix.
const MAX_CLAIM_ATTEMPTS: u32 = 100;

const ALLOWED_PLACEHOLDERS: &[&str] = &[
    "YYYY",
    "MM",
    "DD",
    "FILENAME",
    "EXT",
    "ORIGINAL_FOLDER_NAME",
    "TAGS",
];

/// Characters a template must never contain.
const FORBIDDEN_CHARS: &[char] = &['|', ';', '&', '`'];

#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
}

impl ActionOutcome {
    pub(crate) fn ok(message: String) -> Self {
        Self { success: true, message }
    }

    pub(crate) fn fail(message: String) -> Self {
        Self { success: false, message }
    }
}

pub struct ActionRequest<'a> {
    pub file_path: &'a Path,
    pub monitored_root: &'a Path,
    pub archive_template: &'a str,
    pub action: RuleAction,
    pub dry_run: bool,
    /// Takes precedence over the archive template; may contain placeholders
    /// and environment references.
    pub destination_override: Option<&'a str>,
    pub run_id: &'a str,
    /// Rule context recorded in the history entry.
    pub rule: &'a Rule,
}

pub struct ActionExecutor<'a> {
    history: &'a HistoryLog,
}

impl<'a> ActionExecutor<'a> {
    pub fn new(history: &'a HistoryLog) -> Self {
        Self { history }
    }

    /// Perform (or simulate) the requested action. Per-file failures come
    /// back as `success: false` with a logged FAILURE entry; they never
    /// propagate as errors.
    pub fn execute(&self, req: &ActionRequest) -> ActionOutcome {
        match req.action {
            RuleAction::Move | RuleAction::Copy => self.execute_transfer(req),
            RuleAction::DeleteToTrash | RuleAction::DeletePermanently => {
                self.execute_delete(req)
            }
        }
    }

    fn execute_transfer(&self, req: &ActionRequest) -> ActionOutcome {
        let file_name = display_name(req.file_path);
        let stem = req
            .file_path
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let ext = req
            .file_path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let dest_dir = match resolve_destination(req, &stem, &ext) {
            Ok(dir) => dir,
            Err(msg) => {
                let message = format!("Error: {msg}");
                self.log(req, error_label(req.action, None), Status::Failure, None, &message, None, None);
                return ActionOutcome::fail(message);
            }
        };

        let src_meta = match fs::symlink_metadata(req.file_path) {
            Ok(meta) => meta,
            Err(err) => {
                let message = format!("Error: Source file not found: {file_name} ({err})");
                self.log(req, error_label(req.action, Some(&err)), Status::Failure, None, &message, None, None);
                return ActionOutcome::fail(message);
            }
        };

        if req.dry_run {
            let candidate = probe_destination(&dest_dir, &stem, &ext, MAX_CLAIM_ATTEMPTS);
            let verb = match req.action {
                RuleAction::Move => "move",
                _ => "copy",
            };
            let message = format!(
                "[DRY RUN] Would {verb}: '{file_name}' -> '{}'",
                candidate.display()
            );
            self.log(
                req,
                simulated_label(req.action).to_string(),
                Status::Success,
                Some(candidate.to_string_lossy().to_string()),
                &message,
                None,
                None,
            );
            return ActionOutcome::ok(message);
        }

        if let Err(err) = fs::create_dir_all(&dest_dir) {
            let message = format!(
                "Error: Could not create destination {}: {err}",
                dest_dir.display()
            );
            self.log(req, error_label(req.action, Some(&err)), Status::Failure, None, &message, None, None);
            return ActionOutcome::fail(message);
        }

        let claimed = match claim_destination(&dest_dir, &stem, &ext, MAX_CLAIM_ATTEMPTS) {
            Ok(path) => path,
            Err(err) => {
                let message = format!(
                    "Error: Could not claim a destination name in {}: {err}",
                    dest_dir.display()
                );
                self.log(req, error_label(req.action, Some(&err)), Status::Failure, None, &message, None, None);
                return ActionOutcome::fail(message);
            }
        };

        let shown_dest = claimed
            .strip_prefix(req.monitored_root)
            .unwrap_or(&claimed)
            .to_path_buf();

        match req.action {
            RuleAction::Move => match move_file(req.file_path, &claimed) {
                Ok(()) => {
                    let message = format!("Moved: {file_name} -> {}", shown_dest.display());
                    self.log(
                        req,
                        "MOVED".to_string(),
                        Status::Success,
                        Some(claimed.to_string_lossy().to_string()),
                        &message,
                        None,
                        None,
                    );
                    ActionOutcome::ok(message)
                }
                Err(err) => {
                    let _ = fs::remove_file(&claimed);
                    let message = format!("Error: Move failed for {file_name}: {err}");
                    self.log(req, error_label(req.action, Some(&err)), Status::Failure, None, &message, None, None);
                    ActionOutcome::fail(message)
                }
            },
            RuleAction::Copy => {
                match copy_with_metadata(req.file_path, &claimed, src_meta.len()) {
                    Ok(()) => {
                        let copy_mtime = src_meta
                            .modified()
                            .ok()
                            .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
                            .map(|d| d.as_secs_f64());
                        let message =
                            format!("Copied: {file_name} -> {}", shown_dest.display());
                        self.log(
                            req,
                            "COPIED".to_string(),
                            Status::Success,
                            Some(claimed.to_string_lossy().to_string()),
                            &message,
                            Some(src_meta.len()),
                            copy_mtime,
                        );
                        ActionOutcome::ok(message)
                    }
                    Err(err) => {
                        let _ = fs::remove_file(&claimed);
                        let message = format!("Error: Copy failed for {file_name}: {err}");
                        self.log(req, error_label(req.action, Some(&err)), Status::Failure, None, &message, None, None);
                        ActionOutcome::fail(message)
                    }
                }
            }
            _ => unreachable!("transfer path only handles move and copy"),
        }
    }

    fn execute_delete(&self, req: &ActionRequest) -> ActionOutcome {
        let file_name = display_name(req.file_path);

        if !req.file_path.exists() {
            let err = io::Error::new(io::ErrorKind::NotFound, "no such file");
            let message = format!("Error: Source file not found: {file_name}");
            self.log(req, error_label(req.action, Some(&err)), Status::Failure, None, &message, None, None);
            return ActionOutcome::fail(message);
        }

        if req.dry_run {
            let message = match req.action {
                RuleAction::DeleteToTrash => {
                    format!("[DRY RUN] Would send to trash: '{file_name}'")
                }
                _ => format!("[DRY RUN] Would permanently delete: '{file_name}' (irreversible)"),
            };
            self.log(
                req,
                simulated_label(req.action).to_string(),
                Status::Success,
                None,
                &message,
                None,
                None,
            );
            return ActionOutcome::ok(message);
        }

        let result: Result<&str, (String, Option<io::Error>)> = match req.action {
            RuleAction::DeleteToTrash => trash::delete(req.file_path)
                .map(|_| "Sent to trash")
                .map_err(|e| (e.to_string(), None)),
            RuleAction::DeletePermanently => fs::remove_file(req.file_path)
                .map(|_| "Permanently deleted")
                .map_err(|e| {
                    let msg = e.to_string();
                    (msg, Some(e))
                }),
            _ => unreachable!("delete path only handles trash and permanent delete"),
        };

        match result {
            Ok(verb) => {
                let message = format!("{verb}: {file_name}");
                self.log(
                    req,
                    success_label(req.action).to_string(),
                    Status::Success,
                    None,
                    &message,
                    None,
                    None,
                );
                ActionOutcome::ok(message)
            }
            Err((err_msg, io_err)) => {
                let message = format!("Error: Delete failed for {file_name}: {err_msg}");
                self.log(req, error_label(req.action, io_err.as_ref()), Status::Failure, None, &message, None, None);
                ActionOutcome::fail(message)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn log(
        &self,
        req: &ActionRequest,
        action_taken: String,
        status: Status,
        destination_path: Option<String>,
        details: &str,
        copy_size: Option<u64>,
        copy_mtime: Option<f64>,
    ) {
        let entry = ActionLogEntry {
            timestamp: Utc::now(),
            run_id: req.run_id.to_string(),
            original_path: req.file_path.to_string_lossy().to_string(),
            destination_path,
            action_taken,
            status,
            severity: Some(derive_severity(status)),
            details: details.to_string(),
            monitored_folder: req.monitored_root.to_string_lossy().to_string(),
            rule_pattern: req.rule.pattern.clone(),
            rule_age_days: req.rule.age_days,
            rule_use_regex: req.rule.use_regex,
            copy_size,
            copy_mtime,
        };
        if let Err(err) = self.history.append(&entry) {
            log::warn!("Could not write history entry: {err}");
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name().unwrap_or_default().to_string_lossy().to_string()
}

fn success_label(action: RuleAction) -> &'static str {
    match action {
        RuleAction::Move => "MOVED",
        RuleAction::Copy => "COPIED",
        RuleAction::DeleteToTrash => "DELETED_TO_TRASH",
        RuleAction::DeletePermanently => "PERMANENTLY_DELETED",
    }
}

fn simulated_label(action: RuleAction) -> &'static str {
    match action {
        RuleAction::Move => "SIMULATED_MOVE",
        RuleAction::Copy => "SIMULATED_COPY",
        RuleAction::DeleteToTrash => "SIMULATED_DELETE_TO_TRASH",
        RuleAction::DeletePermanently => "SIMULATED_PERMANENT_DELETE",
    }
}

fn base_label(action: RuleAction) -> &'static str {
    match action {
        RuleAction::Move => "MOVE",
        RuleAction::Copy => "COPY",
        RuleAction::DeleteToTrash => "DELETE_TO_TRASH",
        RuleAction::DeletePermanently => "DELETE_PERMANENTLY",
    }
}

/// `MOVE_ERROR_NOT_FOUND`, `COPY_ERROR_PERMISSION`, ... `None` means the
/// failure happened before any filesystem call (configuration error).
fn error_label(action: RuleAction, err: Option<&io::Error>) -> String {
    let suffix = match err.map(io::Error::kind) {
        Some(io::ErrorKind::NotFound) => "_ERROR_NOT_FOUND",
        Some(io::ErrorKind::PermissionDenied) => "_ERROR_PERMISSION",
        _ => "_ERROR_GENERAL",
    };
    format!("{}{suffix}", base_label(action))
}

// ── Template handling ───────────────────────────────────────

/// Check a template before anything touches the filesystem: no traversal, no
/// shell metacharacters, no placeholders outside the allowed set. An empty
/// template is valid (the default applies at resolution time).
pub fn validate_archive_template(template: &str) -> Result<(), String> {
    if let Some(ch) = template.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(format!("template contains dangerous character '{ch}'"));
    }
    if template.split(['/', '\\']).any(|segment| segment == "..") {
        return Err("template contains path traversal ('..')".to_string());
    }

    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                if !ALLOWED_PLACEHOLDERS.contains(&name) {
                    return Err(format!("unknown placeholder '{{{name}}}'"));
                }
                rest = &after[end + 1..];
            }
            None => return Err("unbalanced '{' in template".to_string()),
        }
    }
    Ok(())
}

fn substitute_placeholders(template: &str, stem: &str, ext: &str, folder_name: &str) -> String {
    let now = Local::now();
    template
        .replace("{YYYY}", &now.format("%Y").to_string())
        .replace("{MM}", &now.format("%m").to_string())
        .replace("{DD}", &now.format("%d").to_string())
        .replace("{FILENAME}", stem)
        .replace("{EXT}", ext)
        .replace("{ORIGINAL_FOLDER_NAME}", folder_name)
        .replace("{TAGS}", "untagged")
}

/// Expand `$VAR`, `${VAR}` and `%VAR%` references. Unset variables are left
/// as written.
fn expand_env_vars(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '$' if i + 1 < chars.len() && chars[i + 1] == '{' => {
                if let Some(close) = chars[i + 2..].iter().position(|&c| c == '}') {
                    let name: String = chars[i + 2..i + 2 + close].iter().collect();
                    match std::env::var(&name) {
                        Ok(value) => out.push_str(&value),
                        Err(_) => out.push_str(&format!("${{{name}}}")),
                    }
                    i += close + 3;
                } else {
                    out.push('$');
                    i += 1;
                }
            }
            '$' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_')
                {
                    end += 1;
                }
                if end > start {
                    let name: String = chars[start..end].iter().collect();
                    match std::env::var(&name) {
                        Ok(value) => out.push_str(&value),
                        Err(_) => out.push_str(&format!("${name}")),
                    }
                    i = end;
                } else {
                    out.push('$');
                    i += 1;
                }
            }
            '%' => {
                if let Some(close) = chars[i + 1..].iter().position(|&c| c == '%') {
                    let name: String = chars[i + 1..i + 1 + close].iter().collect();
                    match std::env::var(&name) {
                        Ok(value) => {
                            out.push_str(&value);
                            i += close + 2;
                        }
                        Err(_) => {
                            out.push('%');
                            i += 1;
                        }
                    }
                } else {
                    out.push('%');
                    i += 1;
                }
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Drop `.` components and resolve `..` lexically; `None` when `..` climbs
/// past the start of the path.
fn normalize_components(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}

/// Work out the destination directory for a transfer. The rule's destination
/// override wins over the archive template; relative results land under the
/// monitored root, and nothing may escape it.
fn resolve_destination(
    req: &ActionRequest,
    stem: &str,
    ext: &str,
) -> Result<PathBuf, String> {
    let (raw, is_override) = match req.destination_override {
        Some(dest) if !dest.trim().is_empty() => (dest.to_string(), true),
        _ => {
            let template = if req.archive_template.trim().is_empty() {
                DEFAULT_ARCHIVE_TEMPLATE
            } else {
                req.archive_template
            };
            (template.to_string(), false)
        }
    };

    let raw = if is_override { expand_env_vars(&raw) } else { raw };
    validate_archive_template(&raw)?;

    let folder_name = display_name(req.monitored_root);
    let substituted = substitute_placeholders(&raw, stem, ext, &folder_name);
    let path = PathBuf::from(&substituted);

    if path.is_absolute() {
        normalize_components(&path)
            .ok_or_else(|| "destination resolves above the filesystem root".to_string())
    } else {
        let relative = normalize_components(&path)
            .ok_or_else(|| "destination escapes the monitored folder".to_string())?;
        Ok(req.monitored_root.join(relative))
    }
}

// ── Destination claiming ────────────────────────────────────

/// Atomically reserve a free name in `dir` by creating the file: `stem`,
/// then `stem_1` … `stem_N`, then a timestamp-suffixed name. Two concurrent
/// claims can never pick the same path.
pub(crate) fn claim_destination(
    dir: &Path,
    stem: &str,
    ext: &str,
    max_attempts: u32,
) -> io::Result<PathBuf> {
    for attempt in 0..=max_attempts {
        let candidate = dir.join(candidate_name(stem, ext, attempt));
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }

    let candidate = dir.join(timestamp_name(stem, ext));
    match OpenOptions::new().write(true).create_new(true).open(&candidate) {
        Ok(_) => Ok(candidate),
        Err(err) => Err(err),
    }
}

/// Dry-run variant of [`claim_destination`]: same probe sequence, no files
/// created.
pub(crate) fn probe_destination(
    dir: &Path,
    stem: &str,
    ext: &str,
    max_attempts: u32,
) -> PathBuf {
    for attempt in 0..=max_attempts {
        let candidate = dir.join(candidate_name(stem, ext, attempt));
        if !candidate.exists() {
            return candidate;
        }
    }
    dir.join(timestamp_name(stem, ext))
}

fn candidate_name(stem: &str, ext: &str, attempt: u32) -> String {
    if attempt == 0 {
        format!("{stem}{ext}")
    } else {
        format!("{stem}_{attempt}{ext}")
    }
}

fn timestamp_name(stem: &str, ext: &str) -> String {
    let stamp = Local::now().format("%Y%m%d_%H%M%S_%f");
    format!("{stem}_{stamp}{ext}")
}

// ── File movement ───────────────────────────────────────────

/// Two-phase move: in-place rename first; when that fails (cross-device
/// link being the usual cause) fall back to copy, verify, then remove the
/// source. The source is never deleted before the destination is confirmed.
pub(crate) fn move_file(src: &Path, dest: &Path) -> io::Result<()> {
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            log::debug!(
                "Rename {} -> {} failed ({rename_err}), falling back to copy",
                src.display(),
                dest.display()
            );
            copy_verify_remove(src, dest)
        }
    }
}

pub(crate) fn copy_verify_remove(src: &Path, dest: &Path) -> io::Result<()> {
    let src_len = fs::metadata(src)?.len();
    let copied = fs::copy(src, dest)?;
    if copied != src_len {
        let _ = fs::remove_file(dest);
        return Err(io::Error::other(format!(
            "copy verification failed: wrote {copied} bytes, expected {src_len}"
        )));
    }
    fs::remove_file(src)
}

fn copy_with_metadata(src: &Path, dest: &Path, expected_len: u64) -> io::Result<()> {
    let copied = fs::copy(src, dest)?;
    if copied != expected_len {
        let _ = fs::remove_file(dest);
        return Err(io::Error::other(format!(
            "copy verification failed: wrote {copied} bytes, expected {expected_len}"
        )));
    }
    if let Ok(meta) = fs::metadata(src) {
        if let Ok(mtime) = meta.modified() {
            let _ = filetime::set_file_mtime(dest, FileTime::from_system_time(mtime));
        }
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────
