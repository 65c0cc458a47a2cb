//! Rule and detection record types.

use std::fmt;

use nodeward_core::LOCAL_RULE_ID;
use regex::Regex;

use crate::error::RulesError;

/// A compiled destination pattern.
///
/// Two rules are equal when their ids and pattern sources match.
#[derive(Clone)]
pub struct DetectRule {
    pub id: i32,
    pub pattern: Regex,
}

impl DetectRule {
    /// Compile `pattern` into a rule.
    pub fn new(id: i32, pattern: &str) -> Result<Self, RulesError> {
        let pattern = Regex::new(pattern).map_err(|source| RulesError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self { id, pattern })
    }

    /// Compile a rule from the local rule file.
    pub fn local(pattern: &str) -> Result<Self, RulesError> {
        Self::new(LOCAL_RULE_ID, pattern)
    }

    pub fn is_local(&self) -> bool {
        self.id == LOCAL_RULE_ID
    }

    #[inline]
    pub fn matches(&self, destination: &str) -> bool {
        self.pattern.is_match(destination)
    }
}

impl PartialEq for DetectRule {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.pattern.as_str() == other.pattern.as_str()
    }
}

impl Eq for DetectRule {}

impl fmt::Debug for DetectRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectRule")
            .field("id", &self.id)
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}

/// A recorded violation: `uid` tried to reach a destination matched by `rule_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DetectResult {
    pub uid: u32,
    pub rule_id: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_uses_id_and_source() {
        let a = DetectRule::new(1, "foo").unwrap();
        assert_eq!(a, DetectRule::new(1, "foo").unwrap());
        assert_ne!(a, DetectRule::new(2, "foo").unwrap());
        assert_ne!(a, DetectRule::new(1, "foo|bar").unwrap());
    }

    #[test]
    fn invalid_pattern_reports_source() {
        let err = DetectRule::new(1, "(unclosed").unwrap_err();
        assert!(err.to_string().contains("(unclosed"));
    }

    #[test]
    fn local_rules_use_reserved_id() {
        let rule = DetectRule::local("bad\\.example").unwrap();
        assert!(rule.is_local());
        assert!(rule.matches("www.bad.example"));
    }
}
