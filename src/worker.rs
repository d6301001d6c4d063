//! The monitoring worker: a single background thread that scans every
//! enabled rule on a schedule and drives the action executor.
//!
//! The worker talks to its owner only through the outbound event channel and
//! a shared stop token. Each cycle works on a snapshot of the configuration
//! taken at the cycle's start, so a concurrent config edit is never observed
//! mid-cycle.

use std::collections::HashSet;
use std::fs;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use uuid::Uuid;

use crate::config::{AppConfig, Rule, Settings};
use crate::events::{NotificationCategory, WorkerEvent, WorkerStatus};
use crate::executor::{ActionExecutor, ActionRequest};
use crate::history::{derive_severity, ActionLogEntry, HistoryLog, Severity, Status};
use crate::pattern::{glob_match, PatternMatcher};
use crate::rules;

/// Cooperative stop signal. Cloned freely; any clone can stop the worker,
/// and the inter-cycle sleep wakes as soon as one does.
#[derive(Clone, Default)]
pub struct StopToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let (flag, condvar) = &*self.inner;
        *flag.lock().unwrap() = true;
        condvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.0.lock().unwrap()
    }

    /// Sleep up to `timeout`; returns true when stop was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, condvar) = &*self.inner;
        let stopped = flag.lock().unwrap();
        let (stopped, _) = condvar
            .wait_timeout_while(stopped, timeout, |stopped| !*stopped)
            .unwrap();
        *stopped
    }
}

pub struct MonitoringWorker {
    config: Arc<Mutex<AppConfig>>,
    history: HistoryLog,
    matcher: PatternMatcher,
    events: Sender<WorkerEvent>,
    stop: StopToken,
}

impl MonitoringWorker {
    pub fn new(
        config: Arc<Mutex<AppConfig>>,
        history: HistoryLog,
        events: Sender<WorkerEvent>,
    ) -> Self {
        Self {
            config,
            history,
            matcher: PatternMatcher::new(),
            events,
            stop: StopToken::new(),
        }
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    /// Scan, sleep, repeat until the stop token fires.
    pub fn run(&self) {
        self.emit(Severity::Info, "Worker started".to_string());
        self.send(WorkerEvent::Status(WorkerStatus::Running));

        loop {
            if self.stop.is_stopped() {
                break;
            }
            self.run_cycle();

            let minutes = {
                self.config.lock().unwrap().settings.scan_interval_minutes
            };
            let interval = Duration::from_secs(u64::from(minutes.max(1)) * 60);
            if self.stop.wait_timeout(interval) {
                break;
            }
        }

        self.emit(Severity::Info, "Worker stopped".to_string());
        self.send(WorkerEvent::Status(WorkerStatus::Stopped));
    }

    /// One scan across all enabled rules. Returns the number of files
    /// processed (acted on, or simulated in dry-run mode).
    pub fn run_cycle(&self) -> u32 {
        let run_id = Uuid::new_v4().to_string();
        let snapshot = { self.config.lock().unwrap().clone() };
        let settings = &snapshot.settings;
        let mut reported_patterns: HashSet<String> = HashSet::new();
        let mut processed = 0u32;

        self.emit(Severity::Info, "Starting scan of monitored folders".to_string());

        for rule in &snapshot.rules {
            if self.stop.is_stopped() {
                return processed;
            }
            if !rule.enabled {
                self.emit(
                    Severity::Info,
                    format!("Skipping disabled rule for {}", rule.path.display()),
                );
                continue;
            }

            let root_str = rule.path.to_string_lossy();
            if settings
                .global_exclusions
                .iter()
                .any(|pattern| glob_match(pattern, &root_str))
            {
                self.emit(
                    Severity::Info,
                    format!("Skipping globally excluded folder {root_str}"),
                );
                continue;
            }

            if !rule.path.is_dir() {
                let message =
                    format!("Folder not found or is not a directory: {}", rule.path.display());
                self.emit(Severity::Error, message.clone());
                self.notify(settings, NotificationCategory::Error, "Scan error", message);
                continue;
            }

            if rule.use_regex
                && !rule.pattern.is_empty()
                && !self.matcher.is_valid_regex(&rule.pattern)
                && reported_patterns.insert(rule.pattern.clone())
            {
                self.emit(
                    Severity::Error,
                    format!(
                        "Invalid regex pattern '{}' for {}",
                        rule.pattern,
                        rule.path.display()
                    ),
                );
            }

            processed += self.scan_rule(rule, settings, &run_id, &mut reported_patterns);
        }

        self.emit(
            Severity::Info,
            format!("Scan finished ({processed} files processed)"),
        );
        if processed > 0 {
            self.notify(
                settings,
                NotificationCategory::Summary,
                "Scan complete",
                format!("{processed} file(s) processed"),
            );
        }

        if settings.log_retention_days > 0 {
            if let Err(err) = self.history.prune(settings.log_retention_days) {
                self.emit(Severity::Warning, format!("History pruning failed: {err}"));
            }
        }

        processed
    }

    fn scan_rule(
        &self,
        rule: &Rule,
        settings: &Settings,
        run_id: &str,
        reported_patterns: &mut HashSet<String>,
    ) -> u32 {
        let mut entries: Vec<_> = match fs::read_dir(&rule.path) {
            Ok(iter) => iter.filter_map(Result::ok).collect(),
            Err(err) => {
                self.emit(
                    Severity::Error,
                    format!("Could not read folder {}: {err}", rule.path.display()),
                );
                return 0;
            }
        };
        // Deterministic scan order.
        entries.sort_by_key(|entry| entry.file_name());

        let now = SystemTime::now();
        let executor = ActionExecutor::new(&self.history);
        let mut processed = 0u32;

        for entry in entries {
            if self.stop.is_stopped() {
                break;
            }

            let path = entry.path();
            let meta = match fs::symlink_metadata(&path) {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            // Symlinks are never evaluated or acted upon; neither are
            // directories or other non-regular entries.
            if !meta.is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }

            if let Some(pattern) = self.excluded_by(&name, rule, reported_patterns) {
                self.log_skipped(rule, &path.to_string_lossy(), run_id, &pattern);
                self.emit(
                    Severity::Info,
                    format!("Skipped '{name}' (exclusion '{pattern}')"),
                );
                continue;
            }

            let mtime = match meta.modified() {
                Ok(mtime) => mtime,
                Err(err) => {
                    self.emit(
                        Severity::Warning,
                        format!("Could not read mtime of '{name}': {err}"),
                    );
                    continue;
                }
            };

            if !rules::admits(now, mtime, &name, rule, &self.matcher) {
                continue;
            }

            let outcome = executor.execute(&ActionRequest {
                file_path: &path,
                monitored_root: &rule.path,
                archive_template: &settings.archive_path_template,
                action: rule.action,
                dry_run: settings.dry_run_mode,
                destination_override: rule.destination_folder.as_deref(),
                run_id,
                rule,
            });

            if outcome.success {
                processed += 1;
                self.emit(Severity::Info, outcome.message);
            } else {
                self.emit(Severity::Error, outcome.message.clone());
                self.notify(
                    settings,
                    NotificationCategory::Error,
                    "Action failed",
                    outcome.message,
                );
            }
        }
        processed
    }

    /// First exclusion pattern matching the filename, if any. Exclusions run
    /// before rule evaluation and always win over inclusion logic.
    fn excluded_by(
        &self,
        name: &str,
        rule: &Rule,
        reported_patterns: &mut HashSet<String>,
    ) -> Option<String> {
        for pattern in &rule.exclusions {
            let hit = if rule.use_regex {
                match self.matcher.safe_regex_match(pattern, name) {
                    Some(hit) => hit,
                    None => {
                        if reported_patterns.insert(pattern.clone()) {
                            self.emit(
                                Severity::Error,
                                format!("Invalid regex exclusion '{pattern}' ignored"),
                            );
                        }
                        false
                    }
                }
            } else {
                glob_match(pattern, name)
            };
            if hit {
                return Some(pattern.clone());
            }
        }
        None
    }

    fn log_skipped(&self, rule: &Rule, file_path: &str, run_id: &str, pattern: &str) {
        let entry = ActionLogEntry {
            timestamp: Utc::now(),
            run_id: run_id.to_string(),
            original_path: file_path.to_string(),
            destination_path: None,
            action_taken: "SKIPPED".to_string(),
            status: Status::Skipped,
            severity: Some(derive_severity(Status::Skipped)),
            details: format!("Excluded by pattern '{pattern}'"),
            monitored_folder: rule.path.to_string_lossy().to_string(),
            rule_pattern: rule.pattern.clone(),
            rule_age_days: rule.age_days,
            rule_use_regex: rule.use_regex,
            copy_size: None,
            copy_mtime: None,
        };
        if let Err(err) = self.history.append(&entry) {
            log::warn!("Could not write history entry: {err}");
        }
    }

    fn send(&self, event: WorkerEvent) {
        let _ = self.events.send(event);
    }

    fn emit(&self, severity: Severity, message: String) {
        match severity {
            Severity::Info => log::info!("{message}"),
            Severity::Warning => log::warn!("{message}"),
            Severity::Error => log::error!("{message}"),
        }
        self.send(WorkerEvent::Log { severity, message });
    }

    fn notify(
        &self,
        settings: &Settings,
        category: NotificationCategory,
        title: &str,
        message: String,
    ) {
        if settings.notification_level.permits(category) {
            self.send(WorkerEvent::Notification {
                title: title.to_string(),
                message,
                category,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RuleAction, RuleLogic};
    use crate::events::NotificationLevel;
    use std::sync::mpsc::{channel, Receiver};
    use tempfile::TempDir;

    struct Harness {
        _data_dir: TempDir,
        monitored: TempDir,
        worker: MonitoringWorker,
        rx: Receiver<WorkerEvent>,
    }

    fn rule_for(path: &std::path::Path) -> Rule {
        Rule {
            path: path.to_path_buf(),
            age_days: 0,
            pattern: "*.txt".to_string(),
            use_regex: false,
            rule_logic: RuleLogic::Or,
            action: RuleAction::Move,
            destination_folder: None,
            exclusions: Vec::new(),
            enabled: true,
        }
    }

    fn harness_with(mutate: impl FnOnce(&mut AppConfig, &std::path::Path)) -> Harness {
        let data_dir = TempDir::new().unwrap();
        let monitored = TempDir::new().unwrap();

        let mut config = AppConfig {
            rules: vec![rule_for(monitored.path())],
            settings: Settings {
                dry_run_mode: true,
                notification_level: NotificationLevel::All,
                ..Settings::default()
            },
        };
        mutate(&mut config, monitored.path());

        let history = HistoryLog::new(data_dir.path());
        let (tx, rx) = channel();
        let worker = MonitoringWorker::new(Arc::new(Mutex::new(config)), history, tx);
        Harness {
            _data_dir: data_dir,
            monitored,
            worker,
            rx,
        }
    }

    fn drain(rx: &Receiver<WorkerEvent>) -> Vec<WorkerEvent> {
        rx.try_iter().collect()
    }

    #[test]
    fn test_enabled_rule_processes_matching_file() {
        let harness = harness_with(|_, _| {});
        fs::write(harness.monitored.path().join("example.txt"), "content").unwrap();

        let processed = harness.worker.run_cycle();
        assert_eq!(processed, 1);

        let entries = harness.worker.history().read_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action_taken, "SIMULATED_MOVE");
    }

    #[test]
    fn test_disabled_rule_skipped_entirely() {
        let harness = harness_with(|config, _| {
            config.rules[0].enabled = false;
        });
        fs::write(harness.monitored.path().join("example.txt"), "content").unwrap();

        let processed = harness.worker.run_cycle();
        assert_eq!(processed, 0);
        assert!(harness.worker.history().read_entries().unwrap().is_empty());
    }

    #[test]
    fn test_glob_exclusion_prevents_processing() {
        let harness = harness_with(|config, _| {
            config.rules[0].exclusions = vec!["skip_*.txt".to_string()];
        });
        fs::write(harness.monitored.path().join("skip_me.txt"), "data").unwrap();

        let processed = harness.worker.run_cycle();
        assert_eq!(processed, 0);

        let entries = harness.worker.history().read_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action_taken, "SKIPPED");
        assert_eq!(entries[0].status, Status::Skipped);
    }

    #[test]
    fn test_regex_exclusion_prevents_processing() {
        let harness = harness_with(|config, _| {
            config.rules[0].pattern = r".*\.log".to_string();
            config.rules[0].use_regex = true;
            config.rules[0].exclusions = vec![r"skipme\.log".to_string()];
        });
        fs::write(harness.monitored.path().join("skipme.log"), "data").unwrap();

        let processed = harness.worker.run_cycle();
        assert_eq!(processed, 0);

        let entries = harness.worker.history().read_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action_taken, "SKIPPED");
    }

    #[test]
    fn test_consecutive_cycles_use_distinct_run_ids() {
        let harness = harness_with(|_, _| {});
        fs::write(harness.monitored.path().join("example.txt"), "content").unwrap();

        harness.worker.run_cycle();
        harness.worker.run_cycle();

        let entries = harness.worker.history().read_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_ne!(entries[0].run_id, entries[1].run_id);
    }

    #[test]
    fn test_missing_folder_logs_error_and_continues() {
        let ghost = TempDir::new().unwrap();
        let ghost_path = ghost.path().join("nowhere");
        let harness = harness_with(|config, _| {
            config.rules.insert(0, rule_for(&ghost_path));
        });
        fs::write(harness.monitored.path().join("example.txt"), "content").unwrap();

        let processed = harness.worker.run_cycle();
        assert_eq!(processed, 1, "second rule must still run");

        let events = drain(&harness.rx);
        assert!(events.iter().any(|event| matches!(
            event,
            WorkerEvent::Log { severity: Severity::Error, message }
                if message.contains("not a directory") || message.contains("not found")
        )));
    }

    #[test]
    fn test_globally_excluded_folder_not_scanned() {
        let harness = harness_with(|config, monitored| {
            config.settings.global_exclusions =
                vec![format!("{}*", monitored.to_string_lossy())];
        });
        fs::write(harness.monitored.path().join("example.txt"), "content").unwrap();

        let processed = harness.worker.run_cycle();
        assert_eq!(processed, 0);
        assert!(harness.worker.history().read_entries().unwrap().is_empty());
    }

    #[test]
    fn test_symlinks_are_skipped() {
        #[cfg(unix)]
        {
            let harness = harness_with(|_, _| {});
            let target = harness.monitored.path().join("real.txt");
            fs::write(&target, "content").unwrap();
            std::os::unix::fs::symlink(&target, harness.monitored.path().join("link.txt"))
                .unwrap();

            let processed = harness.worker.run_cycle();
            // Only the real file, never the symlink.
            assert_eq!(processed, 1);
        }
    }

    #[test]
    fn test_summary_notification_gated_by_level() {
        let harness = harness_with(|_, _| {});
        fs::write(harness.monitored.path().join("example.txt"), "content").unwrap();
        harness.worker.run_cycle();
        let events = drain(&harness.rx);
        assert!(events.iter().any(|event| matches!(
            event,
            WorkerEvent::Notification { category: NotificationCategory::Summary, .. }
        )));

        let quiet = harness_with(|config, _| {
            config.settings.notification_level = NotificationLevel::Error;
        });
        fs::write(quiet.monitored.path().join("example.txt"), "content").unwrap();
        quiet.worker.run_cycle();
        let events = drain(&quiet.rx);
        assert!(!events.iter().any(|event| matches!(
            event,
            WorkerEvent::Notification { category: NotificationCategory::Summary, .. }
        )));
    }

    #[test]
    fn test_no_summary_when_nothing_processed() {
        let harness = harness_with(|_, _| {});
        harness.worker.run_cycle();
        let events = drain(&harness.rx);
        assert!(!events
            .iter()
            .any(|event| matches!(event, WorkerEvent::Notification { .. })));
    }

    #[test]
    fn test_invalid_rule_regex_reported_once_per_cycle() {
        let harness = harness_with(|config, _| {
            config.rules[0].pattern = "([".to_string();
            config.rules[0].use_regex = true;
        });
        fs::write(harness.monitored.path().join("a.txt"), "x").unwrap();
        fs::write(harness.monitored.path().join("b.txt"), "x").unwrap();

        let processed = harness.worker.run_cycle();
        assert_eq!(processed, 0);

        let events = drain(&harness.rx);
        let reports = events
            .iter()
            .filter(|event| matches!(
                event,
                WorkerEvent::Log { severity: Severity::Error, message }
                    if message.contains("Invalid regex")
            ))
            .count();
        assert_eq!(reports, 1);
    }

    #[test]
    fn test_stop_token_interrupts_wait() {
        let token = StopToken::new();
        let waiter = token.clone();
        let handle = std::thread::spawn(move || {
            let start = std::time::Instant::now();
            let stopped = waiter.wait_timeout(Duration::from_secs(60));
            (stopped, start.elapsed())
        });
        std::thread::sleep(Duration::from_millis(50));
        token.stop();
        let (stopped, elapsed) = handle.join().unwrap();
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_run_emits_status_transitions() {
        let harness = harness_with(|_, _| {});
        let token = harness.worker.stop_token();
        token.stop();
        harness.worker.run();

        let events = drain(&harness.rx);
        assert!(events
            .iter()
            .any(|event| matches!(event, WorkerEvent::Status(WorkerStatus::Running))));
        assert!(events
            .iter()
            .any(|event| matches!(event, WorkerEvent::Status(WorkerStatus::Stopped))));
    }
}
