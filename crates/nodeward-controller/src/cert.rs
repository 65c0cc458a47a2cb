//! Certificate renewal contract.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::engine::CertPaths;

/// How an inbound obtains its TLS certificate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertMode {
    #[default]
    None,
    /// Operator-managed files.
    File,
    /// ACME HTTP-01.
    Http,
    /// ACME DNS-01.
    Dns,
    /// ACME TLS-ALPN-01.
    Tls,
}

impl CertMode {
    /// Whether certificates in this mode are issued and renewed by the
    /// renewal collaborator.
    pub fn is_managed(&self) -> bool {
        matches!(self, CertMode::Http | CertMode::Dns | CertMode::Tls)
    }
}

/// Parameters for one issuance/renewal request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertRequest {
    pub domain: String,
    pub email: String,
    pub mode: CertMode,
    /// DNS provider name, for DNS-01.
    pub provider: String,
    pub dns_env: HashMap<String, String>,
}

/// Certificate errors.
#[derive(Debug, thiserror::Error)]
pub enum CertError {
    #[error("cert mode {0:?} does not provide certificates")]
    Unsupported(CertMode),

    #[error("no certificate renewer configured for managed mode {0:?}")]
    NoRenewer(CertMode),

    #[error("missing cert or key file")]
    MissingFiles,

    #[error("renewal failed: {0}")]
    Renewal(String),
}

/// Issues or renews a certificate and returns where it was written.
#[async_trait]
pub trait CertRenewer: Send + Sync {
    async fn renew_certificate(&self, request: &CertRequest) -> Result<CertPaths, CertError>;
}

#[async_trait]
impl<R: CertRenewer + ?Sized> CertRenewer for Arc<R> {
    async fn renew_certificate(&self, request: &CertRequest) -> Result<CertPaths, CertError> {
        (**self).renew_certificate(request).await
    }
}
