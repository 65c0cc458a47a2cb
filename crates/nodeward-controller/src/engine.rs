//! Proxy engine contract.
//!
//! The data plane is external. The controller drives it only through
//! [`ProxyEngine`]: register listeners and upstreams per tag, add and
//! remove user credentials, and read per-user traffic counters.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;

/// Errors reported by a proxy engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{kind} {tag} not found")]
    NotFound { kind: &'static str, tag: String },

    #[error("{kind} {tag} already exists")]
    AlreadyExists { kind: &'static str, tag: String },

    #[error("{0}")]
    Other(String),
}

/// Protocol served by an inbound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Vmess,
    Vless,
    Trojan,
    Shadowsocks,
}

/// Certificate and key file locations for a TLS inbound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertPaths {
    pub cert_file: String,
    pub key_file: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    pub paths: CertPaths,
    pub server_name: String,
    pub reject_unknown_sni: bool,
}

/// Listener configuration for one tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundConfig {
    pub tag: String,
    pub listen: IpAddr,
    pub port: u16,
    pub protocol: Protocol,
    /// `tcp`, `ws`, `grpc`, ...
    pub transport: String,
    pub path: String,
    pub host: String,
    pub service_name: String,
    /// Raw transport header JSON.
    pub header: Option<String>,
    pub tls: Option<TlsSettings>,
    pub sniffing: bool,
    pub proxy_protocol: bool,
    /// Shadowsocks cipher.
    pub cipher: String,
    /// Shadowsocks 2022 server key.
    pub server_key: String,
}

/// Upstream (direct egress) configuration for one tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundConfig {
    pub tag: String,
    pub send_through: IpAddr,
}

/// Protocol-specific user secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Vmess { uuid: String, alter_id: u16 },
    Vless { uuid: String, flow: String },
    Trojan { password: String },
    Shadowsocks { password: String, cipher: String },
}

/// A user registered on an inbound, keyed by user tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCredential {
    pub user_tag: String,
    pub uid: u32,
    pub credential: Credential,
}

/// Byte counters for one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficSample {
    pub upload: u64,
    pub download: u64,
}

impl TrafficSample {
    pub fn is_zero(&self) -> bool {
        self.upload == 0 && self.download == 0
    }

    pub fn total(&self) -> u64 {
        self.upload.saturating_add(self.download)
    }

    /// Bytes counted since `earlier`, per direction.
    pub fn saturating_sub(&self, earlier: TrafficSample) -> TrafficSample {
        TrafficSample {
            upload: self.upload.saturating_sub(earlier.upload),
            download: self.download.saturating_sub(earlier.download),
        }
    }
}

/// Contract with the data-plane engine.
///
/// Traffic is read in two steps so that counters are only reset after the
/// panel has accepted a report: [`peek_traffic`](Self::peek_traffic) reads
/// without resetting, [`reset_traffic`](Self::reset_traffic) subtracts what
/// was reported (bytes that arrived in between are kept).
#[async_trait]
pub trait ProxyEngine: Send + Sync {
    async fn add_inbound(&self, config: &InboundConfig) -> Result<(), EngineError>;

    async fn remove_inbound(&self, tag: &str) -> Result<(), EngineError>;

    async fn add_outbound(&self, config: &OutboundConfig) -> Result<(), EngineError>;

    async fn remove_outbound(&self, tag: &str) -> Result<(), EngineError>;

    async fn add_users(&self, tag: &str, users: &[UserCredential]) -> Result<(), EngineError>;

    async fn remove_users(&self, tag: &str, user_tags: &[String]) -> Result<(), EngineError>;

    /// Current counters for `user_tag`, without resetting them.
    async fn peek_traffic(&self, user_tag: &str) -> Result<TrafficSample, EngineError>;

    /// Subtract `reported` from the counters of `user_tag`.
    async fn reset_traffic(&self, user_tag: &str, reported: TrafficSample) -> Result<(), EngineError>;

    /// Read and reset in one call.
    async fn get_and_reset_traffic(&self, user_tag: &str) -> Result<TrafficSample, EngineError> {
        let sample = self.peek_traffic(user_tag).await?;
        if !sample.is_zero() {
            self.reset_traffic(user_tag, sample).await?;
        }
        Ok(sample)
    }
}

/// Blanket implementation for `Arc<E>` where `E: ProxyEngine`.
#[async_trait]
impl<E: ProxyEngine + ?Sized> ProxyEngine for Arc<E> {
    async fn add_inbound(&self, config: &InboundConfig) -> Result<(), EngineError> {
        (**self).add_inbound(config).await
    }

    async fn remove_inbound(&self, tag: &str) -> Result<(), EngineError> {
        (**self).remove_inbound(tag).await
    }

    async fn add_outbound(&self, config: &OutboundConfig) -> Result<(), EngineError> {
        (**self).add_outbound(config).await
    }

    async fn remove_outbound(&self, tag: &str) -> Result<(), EngineError> {
        (**self).remove_outbound(tag).await
    }

    async fn add_users(&self, tag: &str, users: &[UserCredential]) -> Result<(), EngineError> {
        (**self).add_users(tag, users).await
    }

    async fn remove_users(&self, tag: &str, user_tags: &[String]) -> Result<(), EngineError> {
        (**self).remove_users(tag, user_tags).await
    }

    async fn peek_traffic(&self, user_tag: &str) -> Result<TrafficSample, EngineError> {
        (**self).peek_traffic(user_tag).await
    }

    async fn reset_traffic(&self, user_tag: &str, reported: TrafficSample) -> Result<(), EngineError> {
        (**self).reset_traffic(user_tag, reported).await
    }

    async fn get_and_reset_traffic(&self, user_tag: &str) -> Result<TrafficSample, EngineError> {
        (**self).get_and_reset_traffic(user_tag).await
    }
}
