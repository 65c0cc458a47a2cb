//! # nodeward
//!
//! Control plane for multi-tenant proxy nodes: keeps an external proxy
//! engine converged with a panel's node and user state, enforces per-user
//! rate and device limits, and audits destinations against regex rules.
//!
//! ## Crates
//!
//! - [`nodeward_core`] - Shared data model, tags and metric names
//! - [`nodeward_limiter`] - Rate buckets and device admission
//! - [`nodeward_rules`] - Audit rules and detections
//! - [`nodeward_panel`] - Panel contract and UniProxy client
//! - [`nodeward_controller`] - Reconciliation controller and engine contract

pub mod config;
pub mod logging;
pub mod metrics;
pub mod node_set;

pub use nodeward_controller as controller;
pub use nodeward_core as core;
pub use nodeward_limiter as limiter;
pub use nodeward_panel as panel;
pub use nodeward_rules as rules;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{NodeConfig, NodewardConfig, load_config, validate_config};
    pub use crate::logging::init_tracing;
    pub use crate::node_set::NodeSet;
    pub use nodeward_controller::{Controller, ControllerConfig, ProxyEngine};
    pub use nodeward_limiter::{Admission, Limiter};
    pub use nodeward_panel::{PanelApi, PanelConfig, UniProxyClient};
    pub use nodeward_rules::RuleManager;
}
