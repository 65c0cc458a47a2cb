//! Panel client configuration.

use std::time::Duration;

use nodeward_core::{DEFAULT_PANEL_TIMEOUT_SECS, NodeType};
use serde::Deserialize;

/// Connection and override settings for one panel node.
#[derive(Debug, Clone, Deserialize)]
pub struct PanelConfig {
    /// Panel base URL (e.g. `https://panel.example.com`).
    pub api_host: String,

    /// Node communication key issued by the panel.
    pub api_key: String,

    pub node_id: u32,

    pub node_type: NodeType,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Per-user speed limit override in Mbps (0 = use the panel's value).
    #[serde(default)]
    pub speed_limit_mbps: f64,

    /// Per-user device limit (0 = unlimited).
    #[serde(default)]
    pub device_limit: u32,

    /// Serve VLESS instead of VMess on V2ray nodes.
    #[serde(default)]
    pub enable_vless: bool,

    /// VLESS flow applied to every user (e.g. `xtls-rprx-vision`).
    #[serde(default)]
    pub vless_flow: String,
}

impl PanelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_timeout_secs() -> u64 {
    DEFAULT_PANEL_TIMEOUT_SECS
}
