//! Destination audit rules for nodeward.
//!
//! Each inbound tag carries an ordered list of compiled patterns. The data
//! plane asks [`RuleManager::detect`] before dialing a destination; the
//! first matching rule rejects the connection and records a
//! [`DetectResult`] that the controller later drains and reports.
//!
//! # Example
//!
//! ```
//! use nodeward_rules::{DetectRule, RuleManager};
//!
//! let manager = RuleManager::new();
//! manager.update_rules("Trojan_0.0.0.0_443", vec![
//!     DetectRule::new(3, r"(^|\.)torrent\.example$").unwrap(),
//! ]);
//!
//! let user_tag = "Trojan_0.0.0.0_443|alice@v2board.user|17";
//! assert!(manager.detect("Trojan_0.0.0.0_443", "tracker.torrent.example", user_tag));
//! assert!(!manager.detect("Trojan_0.0.0.0_443", "example.org", user_tag));
//!
//! let hits = manager.drain_detections("Trojan_0.0.0.0_443").unwrap();
//! assert_eq!(hits.len(), 1);
//! assert_eq!((hits[0].uid, hits[0].rule_id), (17, 3));
//! ```

pub mod error;
pub mod manager;
pub mod provider;
pub mod rule;

pub use error::RulesError;
pub use manager::RuleManager;
pub use provider::{load_rule_file, parse_rule_list};
pub use rule::{DetectResult, DetectRule};
