//! Error types for the rule manager.

use thiserror::Error;

/// Errors that can occur while loading or querying rules.
#[derive(Error, Debug)]
pub enum RulesError {
    #[error("invalid pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("no rule table for tag: {0}")]
    NoSuchTag(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
