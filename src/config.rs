use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::events::NotificationLevel;

/// Get the app data directory: `<config_dir>/autotidy/`
pub fn app_data_dir() -> PathBuf {
    let dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("autotidy");
    fs::create_dir_all(&dir).ok();
    dir
}

fn config_path() -> PathBuf {
    app_data_dir().join("config.json")
}

pub const DEFAULT_ARCHIVE_TEMPLATE: &str = "_Cleanup/{YYYY}-{MM}-{DD}";

// ── Data types ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub settings: Settings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Minutes between periodic scans
    #[serde(default = "default_scan_interval")]
    pub scan_interval_minutes: u32,
    /// Where matched files go when a rule has no destination of its own.
    /// Resolved relative to the monitored folder.
    #[serde(default = "default_archive_template")]
    pub archive_path_template: String,
    /// Compute and log actions without touching the filesystem
    #[serde(default)]
    pub dry_run_mode: bool,
    #[serde(default)]
    pub notification_level: NotificationLevel,
    /// Days to keep history entries
    #[serde(default = "default_log_retention")]
    pub log_retention_days: u32,
    /// Glob patterns for monitored paths that must never be scanned
    #[serde(default)]
    pub global_exclusions: Vec<String>,
}

fn default_scan_interval() -> u32 {
    5
}

fn default_archive_template() -> String {
    DEFAULT_ARCHIVE_TEMPLATE.to_string()
}

fn default_log_retention() -> u32 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scan_interval_minutes: default_scan_interval(),
            archive_path_template: default_archive_template(),
            dry_run_mode: false,
            notification_level: NotificationLevel::default(),
            log_retention_days: default_log_retention(),
            global_exclusions: Vec::new(),
        }
    }
}

/// Per-folder rule: match conditions plus the action to take on matches.
/// Identified by `path` (unique within a configuration).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub path: PathBuf,
    /// Files strictly older than this many days match the age condition.
    /// 0 leaves the age condition out of the rule entirely.
    #[serde(default)]
    pub age_days: u32,
    #[serde(default = "default_pattern")]
    pub pattern: String,
    #[serde(default)]
    pub use_regex: bool,
    #[serde(default)]
    pub rule_logic: RuleLogic,
    #[serde(default)]
    pub action: RuleAction,
    /// Overrides the archive template; may contain placeholders and
    /// environment references.
    #[serde(default)]
    pub destination_folder: Option<String>,
    /// Filename patterns this rule must never touch (regex when `use_regex`).
    #[serde(default)]
    pub exclusions: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_pattern() -> String {
    "*".to_string()
}

fn default_true() -> bool {
    true
}

/// How the age and pattern conditions combine. Anything that is not `OR`
/// deserializes to `And`; the stricter reading wins for unknown values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", from = "String")]
pub enum RuleLogic {
    #[default]
    And,
    Or,
}

impl From<String> for RuleLogic {
    fn from(value: String) -> Self {
        if value.eq_ignore_ascii_case("OR") {
            RuleLogic::Or
        } else {
            RuleLogic::And
        }
    }
}

/// What to do with a matched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    #[default]
    Move,
    Copy,
    DeleteToTrash,
    DeletePermanently,
}

// ── Load / Save ─────────────────────────────────────────────

pub fn load_config() -> AppConfig {
    load_config_from(&config_path())
}

/// Load a config file, falling back to defaults when it is missing. An
/// unparsable file is preserved as `<name>.corrupt.bak` before defaults are
/// returned, so a hand-edit gone wrong is never silently destroyed.
pub fn load_config_from(path: &Path) -> AppConfig {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return AppConfig::default();
        }
        Err(err) => {
            log::error!("Failed to read config {}: {}", path.display(), err);
            return AppConfig::default();
        }
    };

    match serde_json::from_str(&data) {
        Ok(config) => config,
        Err(err) => {
            log::error!("Config {} is corrupted: {}", path.display(), err);
            let backup = PathBuf::from(format!("{}.corrupt.bak", path.display()));
            if let Err(backup_err) = fs::write(&backup, &data) {
                log::error!("Could not back up corrupted config: {backup_err}");
            }
            AppConfig::default()
        }
    }
}

pub fn save_config(config: &AppConfig) -> Result<(), String> {
    save_config_to(config, &config_path())
}

pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    let json = serde_json::to_string_pretty(config).map_err(|e| e.to_string())?;
    fs::write(path, json).map_err(|e| e.to_string())?;
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rule_logic_unknown_falls_back_to_and() {
        let rule: Rule =
            serde_json::from_str(r#"{"path": "/tmp/watched", "rule_logic": "XOR"}"#).unwrap();
        assert_eq!(rule.rule_logic, RuleLogic::And);

        let rule: Rule =
            serde_json::from_str(r#"{"path": "/tmp/watched", "rule_logic": "or"}"#).unwrap();
        assert_eq!(rule.rule_logic, RuleLogic::Or);
    }

    #[test]
    fn test_rule_defaults() {
        let rule: Rule = serde_json::from_str(r#"{"path": "/tmp/watched"}"#).unwrap();
        assert_eq!(rule.age_days, 0);
        assert_eq!(rule.pattern, "*");
        assert!(!rule.use_regex);
        assert_eq!(rule.rule_logic, RuleLogic::And);
        assert_eq!(rule.action, RuleAction::Move);
        assert!(rule.enabled);
        assert!(rule.exclusions.is_empty());
    }

    #[test]
    fn test_action_snake_case() {
        let rule: Rule =
            serde_json::from_str(r#"{"path": "/tmp/watched", "action": "delete_to_trash"}"#)
                .unwrap();
        assert_eq!(rule.action, RuleAction::DeleteToTrash);
    }

    #[test]
    fn test_missing_config_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config_from(&dir.path().join("config.json"));
        assert!(config.rules.is_empty());
        assert_eq!(config.settings.scan_interval_minutes, 5);
        assert_eq!(config.settings.archive_path_template, DEFAULT_ARCHIVE_TEMPLATE);
    }

    #[test]
    fn test_corrupted_config_creates_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let corrupt = "{ rules: [ definitely not json";
        fs::write(&path, corrupt).unwrap();

        let config = load_config_from(&path);
        assert!(config.rules.is_empty());

        let backup = dir.path().join("config.json.corrupt.bak");
        assert!(backup.exists());
        assert_eq!(fs::read_to_string(backup).unwrap(), corrupt);
    }

    #[test]
    fn test_valid_config_no_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let config = AppConfig::default();
        save_config_to(&config, &path).unwrap();

        load_config_from(&path);
        assert!(!dir.path().join("config.json.corrupt.bak").exists());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let config = AppConfig {
            rules: vec![Rule {
                path: PathBuf::from("/tmp/downloads"),
                age_days: 30,
                pattern: "*.pdf".to_string(),
                use_regex: false,
                rule_logic: RuleLogic::Or,
                action: RuleAction::Copy,
                destination_folder: Some("archive/{YYYY}".to_string()),
                exclusions: vec!["keep_*.pdf".to_string()],
                enabled: true,
            }],
            settings: Settings::default(),
        };

        save_config_to(&config, &path).unwrap();
        let loaded = load_config_from(&path);
        assert_eq!(loaded.rules.len(), 1);
        assert_eq!(loaded.rules[0].pattern, "*.pdf");
        assert_eq!(loaded.rules[0].rule_logic, RuleLogic::Or);
        assert_eq!(loaded.rules[0].action, RuleAction::Copy);
    }
}
