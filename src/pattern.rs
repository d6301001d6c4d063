//! Filename matching for rules and exclusions.
//!
//! Two pattern flavors:
//!   glob:  shell-style wildcards (`*`, `?`, `[...]`) against the bare
//!           filename, case-sensitive
//!   regex: full-string match (anchored at both ends), case-sensitive
//!
//! Regex compilation is cached per pattern string for the lifetime of the
//! matcher, and bounded by a compile size limit so a pathological pattern
//! cannot eat the process. An invalid or oversized pattern evaluates to
//! "no match"; the worker reports it once per cycle.

use std::collections::HashMap;
use std::sync::Mutex;

use regex::{Regex, RegexBuilder};

/// Upper bound on a compiled regex program.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

pub struct PatternMatcher {
    cache: Mutex<HashMap<String, Option<Regex>>>,
}

impl PatternMatcher {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Test a bare filename against a rule pattern.
    pub fn matches(&self, name: &str, pattern: &str, use_regex: bool) -> bool {
        if use_regex {
            self.safe_regex_match(pattern, name).unwrap_or(false)
        } else {
            glob_match(pattern, name)
        }
    }

    /// Full-string regex match. `None` when the pattern cannot be compiled;
    /// callers treat that as "no match".
    pub fn safe_regex_match(&self, pattern: &str, subject: &str) -> Option<bool> {
        let mut cache = self.cache.lock().unwrap();
        let compiled = cache
            .entry(pattern.to_string())
            .or_insert_with(|| compile_anchored(pattern));
        compiled.as_ref().map(|re| re.is_match(subject))
    }

    /// Whether the pattern compiles. Uses the same cache as matching, so the
    /// answer is free after the first call.
    pub fn is_valid_regex(&self, pattern: &str) -> bool {
        let mut cache = self.cache.lock().unwrap();
        cache
            .entry(pattern.to_string())
            .or_insert_with(|| compile_anchored(pattern))
            .is_some()
    }
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn compile_anchored(pattern: &str) -> Option<Regex> {
    RegexBuilder::new(&format!("^(?:{pattern})$"))
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .ok()
}

/// Shell-style wildcard match against a bare filename.
/// An invalid pattern matches nothing.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    glob::Pattern::new(pattern)
        .map(|p| p.matches(name))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*.pdf", "report.pdf"));
        assert!(!glob_match("*.pdf", "report.doc"));
        assert!(glob_match("invoice*", "invoice_2026.pdf"));
        assert!(glob_match("*report*", "annual_report_v2.xlsx"));
        assert!(glob_match("?est.txt", "test.txt"));
        assert!(!glob_match("?est.txt", "arest.txt"));
        assert!(glob_match("report_[0-9].txt", "report_3.txt"));
        assert!(!glob_match("report_[0-9].txt", "report_x.txt"));
        assert!(glob_match("*", "anything.xyz"));
    }

    #[test]
    fn test_glob_case_sensitive() {
        assert!(!glob_match("*.PDF", "report.pdf"));
        assert!(glob_match("*.PDF", "report.PDF"));
    }

    #[test]
    fn test_glob_invalid_pattern_no_match() {
        assert!(!glob_match("[unclosed", "anything"));
    }

    #[test]
    fn test_regex_full_string_semantics() {
        let matcher = PatternMatcher::new();
        assert_eq!(matcher.safe_regex_match(r"report_\d{4}\.pdf", "report_2024.pdf"), Some(true));
        // Anchored: a substring match is not enough.
        assert_eq!(matcher.safe_regex_match("report", "report_2024.pdf"), Some(false));
        assert_eq!(matcher.safe_regex_match(r".*\.txt", "file.txt"), Some(true));
        assert_eq!(matcher.safe_regex_match(r".*\.txt", "file.pdf"), Some(false));
    }

    #[test]
    fn test_regex_case_sensitive() {
        let matcher = PatternMatcher::new();
        assert_eq!(matcher.safe_regex_match(r"report_\d{4}\.pdf", "Report_2024.pdf"), Some(false));
        assert_eq!(matcher.safe_regex_match(r"file\.TXT", "file.TXT"), Some(true));
        assert_eq!(matcher.safe_regex_match(r"file\.TXT", "file.txt"), Some(false));
    }

    #[test]
    fn test_invalid_regex_returns_none() {
        let matcher = PatternMatcher::new();
        assert_eq!(matcher.safe_regex_match("[invalid", "test"), None);
        assert!(!matcher.is_valid_regex("[invalid"));
        assert!(matcher.is_valid_regex(r".*\.log"));
    }

    #[test]
    fn test_invalid_regex_treated_as_no_match() {
        let matcher = PatternMatcher::new();
        assert!(!matcher.matches("test.txt", "([", true));
    }

    #[test]
    fn test_empty_regex_matches_only_empty() {
        let matcher = PatternMatcher::new();
        assert_eq!(matcher.safe_regex_match("", ""), Some(true));
        assert_eq!(matcher.safe_regex_match("a+", ""), Some(false));
    }

    #[test]
    fn test_cache_survives_repeat_lookups() {
        let matcher = PatternMatcher::new();
        for _ in 0..3 {
            assert_eq!(matcher.safe_regex_match(r"\d+", "123"), Some(true));
            assert_eq!(matcher.safe_regex_match("[bad", "123"), None);
        }
    }
}
