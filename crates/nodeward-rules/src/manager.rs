//! Per-inbound rule tables and violation tracking.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use nodeward_core::{metrics, parse_user_tag_uid};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::RulesError;
use crate::rule::{DetectResult, DetectRule};

#[derive(Debug)]
struct TagRules {
    rules: ArcSwap<Vec<DetectRule>>,
    detections: Mutex<HashSet<DetectResult>>,
}

impl TagRules {
    fn new(rules: Vec<DetectRule>) -> Self {
        Self {
            rules: ArcSwap::from_pointee(rules),
            detections: Mutex::new(HashSet::new()),
        }
    }
}

/// Rule lists and accumulated detections, keyed by inbound tag.
///
/// Send + Sync, designed to be shared via `Arc<RuleManager>`. Matching
/// reads a snapshot of the rule list, so replacing rules never blocks
/// in-flight checks.
#[derive(Debug, Default)]
pub struct RuleManager {
    tags: DashMap<String, Arc<TagRules>>,
}

impl RuleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the rule list for `tag` wholesale.
    ///
    /// Returns whether the list differs from the previous one. Pending
    /// detections are kept.
    pub fn update_rules(&self, tag: &str, rules: Vec<DetectRule>) -> bool {
        if let Some(entry) = self.tags.get(tag) {
            let entry = Arc::clone(&entry);
            let changed = **entry.rules.load() != rules;
            if changed {
                debug!(tag, count = rules.len(), "audit rules replaced");
                entry.rules.store(Arc::new(rules));
            }
            return changed;
        }
        debug!(tag, count = rules.len(), "audit rules installed");
        self.tags
            .insert(tag.to_string(), Arc::new(TagRules::new(rules)));
        true
    }

    /// Drop the rule table and pending detections for `tag`.
    pub fn remove_tag(&self, tag: &str) -> bool {
        self.tags.remove(tag).is_some()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.tags.contains_key(tag)
    }

    /// Current rules for `tag`.
    pub fn rules(&self, tag: &str) -> Option<Arc<Vec<DetectRule>>> {
        self.tags.get(tag).map(|e| e.rules.load_full())
    }

    /// Check `destination` against the rules of `tag`; the first match wins.
    ///
    /// On a match the violation is recorded (best effort: a malformed
    /// `user_tag` is logged and not recorded) and `true` is returned.
    pub fn detect(&self, tag: &str, destination: &str, user_tag: &str) -> bool {
        let Some(entry) = self.tags.get(tag).map(|e| Arc::clone(&e)) else {
            return false;
        };

        let rules = entry.rules.load();
        let Some(rule) = rules.iter().find(|r| r.matches(destination)) else {
            return false;
        };

        metrics::record_rule_hit(tag);
        match parse_user_tag_uid(user_tag) {
            Some(uid) => {
                entry.detections.lock().insert(DetectResult {
                    uid,
                    rule_id: rule.id,
                });
            }
            None => debug!(tag, user_tag, rule_id = rule.id, "cannot parse uid from user tag"),
        }
        true
    }

    /// Take and clear the detections recorded under `tag`.
    pub fn drain_detections(&self, tag: &str) -> Result<Vec<DetectResult>, RulesError> {
        let entry = self
            .tags
            .get(tag)
            .map(|e| Arc::clone(&e))
            .ok_or_else(|| RulesError::NoSuchTag(tag.to_string()))?;
        let drained = std::mem::take(&mut *entry.detections.lock());
        Ok(drained.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAG: &str = "V2ray_0.0.0.0_8080";

    fn rule(id: i32, pattern: &str) -> DetectRule {
        DetectRule::new(id, pattern).unwrap()
    }

    fn user_tag(uid: u32) -> String {
        format!("{TAG}|{uid}@v2board.user|{uid}")
    }

    #[test]
    fn first_match_wins() {
        let manager = RuleManager::new();
        manager.update_rules(TAG, vec![rule(1, "example"), rule(2, r"\.com$")]);

        assert!(manager.detect(TAG, "www.example.com", &user_tag(5)));
        let hits = manager.drain_detections(TAG).unwrap();
        assert_eq!(hits, vec![DetectResult { uid: 5, rule_id: 1 }]);
    }

    #[test]
    fn detections_are_deduplicated() {
        let manager = RuleManager::new();
        manager.update_rules(TAG, vec![rule(1, "blocked")]);
        for _ in 0..5 {
            assert!(manager.detect(TAG, "blocked.net", &user_tag(9)));
        }
        assert!(manager.detect(TAG, "blocked.net", &user_tag(10)));

        let mut hits = manager.drain_detections(TAG).unwrap();
        hits.sort();
        assert_eq!(
            hits,
            vec![
                DetectResult { uid: 9, rule_id: 1 },
                DetectResult { uid: 10, rule_id: 1 },
            ]
        );
    }

    #[test]
    fn drain_is_destructive() {
        let manager = RuleManager::new();
        manager.update_rules(TAG, vec![rule(1, "x")]);
        manager.detect(TAG, "x", &user_tag(1));
        assert_eq!(manager.drain_detections(TAG).unwrap().len(), 1);
        assert!(manager.drain_detections(TAG).unwrap().is_empty());
    }

    #[test]
    fn malformed_user_tag_still_rejects() {
        let manager = RuleManager::new();
        manager.update_rules(TAG, vec![rule(4, "bad")]);
        assert!(manager.detect(TAG, "bad.example", "not-a-user-tag"));
        assert!(manager.drain_detections(TAG).unwrap().is_empty());
    }

    #[test]
    fn unknown_tag_allows() {
        let manager = RuleManager::new();
        assert!(!manager.detect("missing", "anything", "missing|a|1"));
        assert!(matches!(
            manager.drain_detections("missing"),
            Err(RulesError::NoSuchTag(_))
        ));
    }

    #[test]
    fn update_reports_changes() {
        let manager = RuleManager::new();
        assert!(manager.update_rules(TAG, vec![rule(1, "a")]));
        assert!(!manager.update_rules(TAG, vec![rule(1, "a")]));
        assert!(manager.update_rules(TAG, vec![rule(1, "a"), rule(2, "b")]));
        assert_eq!(manager.rules(TAG).unwrap().len(), 2);
    }

    #[test]
    fn replacing_rules_keeps_pending_detections() {
        let manager = RuleManager::new();
        manager.update_rules(TAG, vec![rule(1, "a")]);
        manager.detect(TAG, "a", &user_tag(3));
        manager.update_rules(TAG, vec![rule(2, "b")]);
        assert!(!manager.detect(TAG, "a", &user_tag(3)));
        assert_eq!(manager.drain_detections(TAG).unwrap().len(), 1);
    }

    #[test]
    fn remove_tag_drops_everything() {
        let manager = RuleManager::new();
        manager.update_rules(TAG, vec![rule(1, "a")]);
        assert!(manager.remove_tag(TAG));
        assert!(!manager.contains(TAG));
        assert!(!manager.remove_tag(TAG));
    }
}
