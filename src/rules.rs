//! Per-file rule admission: combines the age and pattern conditions.
//!
//! Exclusions and symlink handling are the worker's responsibility and run
//! before this check; a file matching any exclusion never gets here. That
//! ordering is part of the contract, not an optimization.

use std::time::SystemTime;

use crate::config::{Rule, RuleLogic};
use crate::pattern::PatternMatcher;

const SECONDS_PER_DAY: u64 = 86_400;

/// Whole days elapsed since the file was last modified.
pub fn age_in_days(now: SystemTime, mtime: SystemTime) -> u64 {
    now.duration_since(mtime)
        .map(|elapsed| elapsed.as_secs() / SECONDS_PER_DAY)
        .unwrap_or(0)
}

/// Decide whether a rule admits a file.
///
/// The age condition holds when the file is strictly older than
/// `rule.age_days` days; `age_days == 0` takes the condition out of the rule.
/// An empty pattern likewise leaves the name condition out. A condition that
/// is left out is satisfied under AND but cannot trigger a match under OR.
pub fn admits(
    now: SystemTime,
    mtime: SystemTime,
    file_name: &str,
    rule: &Rule,
    matcher: &PatternMatcher,
) -> bool {
    let age_specified = rule.age_days > 0;
    let pattern_specified = !rule.pattern.is_empty();

    let age_holds = age_specified && age_in_days(now, mtime) > rule.age_days as u64;
    let name_holds =
        pattern_specified && matcher.matches(file_name, &rule.pattern, rule.use_regex);

    match rule.rule_logic {
        RuleLogic::And => {
            (!age_specified || age_holds) && (!pattern_specified || name_holds)
        }
        RuleLogic::Or => age_holds || name_holds,
    }
}
