//! Local rule file loading.
//!
//! The file holds one regular expression per line. Blank lines and lines
//! starting with `#` are skipped. Lines that fail to compile are logged
//! and skipped; they never abort loading.

use std::path::Path;

use tracing::{debug, warn};

use crate::error::RulesError;
use crate::rule::DetectRule;

/// Load the local rule list from `path`.
pub fn load_rule_file(path: &Path) -> Result<Vec<DetectRule>, RulesError> {
    let content = std::fs::read_to_string(path)?;
    let rules = parse_rule_list(&content);
    debug!(path = %path.display(), count = rules.len(), "local rules loaded");
    Ok(rules)
}

/// Parse rule-list content into local rules.
pub fn parse_rule_list(content: &str) -> Vec<DetectRule> {
    let mut rules = Vec::new();

    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match DetectRule::local(line) {
            Ok(rule) => rules.push(rule),
            Err(e) => warn!(line = lineno + 1, error = %e, "skipping invalid rule"),
        }
    }

    rules
}
