//! Per-user admission control for proxy inbounds.
//!
//! The [`Limiter`] owns one [`InboundLimitTable`] per live inbound tag and
//! answers a single hot-path question for every new connection: which
//! token bucket (if any) throttles this user, and is this source address
//! allowed at all under the user's device cap.
//!
//! Device counting is local by default. When a [`SharedStore`] is attached
//! through [`GlobalDeviceLimit`], observations are mirrored to it in the
//! background so the cap can be enforced across a cluster of nodes.

pub mod bucket;
pub mod config;
pub mod error;
pub mod global;
pub mod limiter;
pub mod online;
#[cfg(feature = "redis")]
pub mod redis;
pub mod store;
pub mod table;

pub use bucket::RateBucket;
pub use config::{MissingTablePolicy, RedisConfig};
pub use error::LimiterError;
pub use global::GlobalDeviceLimit;
pub use limiter::{Admission, Limiter, determine_rate};
pub use online::OnlineIpSet;
#[cfg(feature = "redis")]
pub use redis::RedisStore;
pub use store::{MemoryStore, SharedStore};
pub use table::{InboundLimitTable, UserLimit};
