//! Reconciliation controller.
//!
//! Keeps a proxy engine, a [`nodeward_limiter::Limiter`] and a
//! [`nodeward_rules::RuleManager`] converged with the state a panel
//! publishes, and reports usage back on a fixed interval.

pub mod builder;
pub mod cert;
pub mod config;
pub mod controller;
pub mod diff;
pub mod engine;
pub mod error;
pub mod status;
pub mod throttle;

pub use cert::{CertError, CertMode, CertRenewer, CertRequest};
pub use config::{AutoSpeedLimitConfig, CertConfig, ControllerConfig};
pub use controller::{Controller, ControllerBuilder, Phase, ReconcileOutcome};
pub use diff::compare_user_lists;
pub use engine::{
    CertPaths, Credential, EngineError, InboundConfig, OutboundConfig, Protocol, ProxyEngine,
    TlsSettings, TrafficSample, UserCredential,
};
pub use error::ControllerError;
pub use status::{StatusProbe, SystemProbe};
pub use throttle::{AutoThrottle, LimitSuspension};
