//! Panel error types.

/// Panel error type.
#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    /// The user list has not changed since the previous pull.
    ///
    /// Not a failure: callers reuse their previous snapshot.
    #[error("users no change")]
    NoChange,

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request {url} failed: HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("config: {0}")]
    Config(String),
}

impl PanelError {
    /// Whether this is the "reuse previous snapshot" outcome.
    #[inline]
    pub fn is_no_change(&self) -> bool {
        matches!(self, PanelError::NoChange)
    }
}
