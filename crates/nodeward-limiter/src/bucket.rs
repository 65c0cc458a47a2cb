//! Token bucket bounding one user's throughput.

use std::fmt;
use std::num::NonZeroU32;

use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};

/// Highest rate a bucket enforces; the token clock has nanosecond resolution.
pub const MAX_BUCKET_RATE: u64 = 1_000_000_000;

/// A bytes-per-second token bucket with a one-second burst.
///
/// Buckets are never retuned in place: when a user's effective rate
/// changes the limiter drops the bucket and a fresh one is built on the
/// next admission, so in-flight holders keep a consistent limit.
pub struct RateBucket {
    limit: u64,
    burst: NonZeroU32,
    inner: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl RateBucket {
    /// Build a bucket for `bytes_per_sec`. Returns `None` for 0 (unlimited).
    pub fn new(bytes_per_sec: u64) -> Option<Self> {
        #[expect(clippy::cast_possible_truncation)]
        let clamped = bytes_per_sec.min(MAX_BUCKET_RATE) as u32;
        let burst = NonZeroU32::new(clamped)?;
        Some(Self {
            limit: bytes_per_sec,
            burst,
            inner: RateLimiter::direct(Quota::per_second(burst)),
        })
    }

    /// Configured rate in bytes/second.
    #[inline]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Take `bytes` tokens if they are available right now.
    ///
    /// Requests larger than the burst can never succeed here; use
    /// [`consume`](Self::consume) for those.
    pub fn try_consume(&self, bytes: u32) -> bool {
        let Some(n) = NonZeroU32::new(bytes) else {
            return true;
        };
        matches!(self.inner.check_n(n), Ok(Ok(())))
    }

    /// Wait until `bytes` tokens have been taken, in burst-sized chunks.
    pub async fn consume(&self, bytes: usize) {
        let burst = self.burst.get() as usize;
        let mut remaining = bytes;
        while remaining > 0 {
            let chunk = remaining.min(burst);
            remaining -= chunk;
            #[expect(clippy::cast_possible_truncation)]
            let Some(n) = NonZeroU32::new(chunk as u32) else {
                return;
            };
            // chunk <= burst, so capacity is always sufficient
            if self.inner.until_n_ready(n).await.is_err() {
                return;
            }
        }
    }
}

impl fmt::Debug for RateBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateBucket")
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}
