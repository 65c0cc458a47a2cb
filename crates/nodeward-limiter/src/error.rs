//! Limiter error types.

/// Limiter error type.
#[derive(Debug, thiserror::Error)]
pub enum LimiterError {
    #[error("no such inbound in limiter: {0}")]
    NoSuchInbound(String),

    #[error("shared store: {0}")]
    Store(String),

    #[error("shared store timed out")]
    Timeout,

    #[cfg(feature = "redis")]
    #[error("redis: {0}")]
    Redis(#[from] ::redis::RedisError),
}
