//! Top-level configuration file.
//!
//! ```toml
//! log_level = "info"
//! missing_table_policy = "allow"
//!
//! [[nodes]]
//! [nodes.panel]
//! api_host = "https://panel.example.com"
//! api_key = "secret"
//! node_id = 1
//! node_type = "Trojan"
//!
//! [nodes.controller]
//! update_periodic_secs = 60
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use nodeward_controller::ControllerConfig;
use nodeward_limiter::MissingTablePolicy;
use nodeward_panel::PanelConfig;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported config format")]
    UnsupportedFormat,
    #[error("validation: {0}")]
    Validation(String),
}

/// Whole-process configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NodewardConfig {
    /// `EnvFilter` directive, e.g. `info` or `nodeward_controller=debug`.
    #[serde(default)]
    pub log_level: Option<String>,

    /// Prometheus exporter address; disabled when unset.
    #[serde(default)]
    pub metrics_listen: Option<String>,

    /// Admission policy for tags without a limit table.
    #[serde(default)]
    pub missing_table_policy: MissingTablePolicy,

    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

/// One panel node and how to drive it.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub panel: PanelConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
}

/// Load a config file; the format follows the extension.
pub fn load_config(path: impl AsRef<Path>) -> Result<NodewardConfig, ConfigError> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)?;
    match path.extension().and_then(|s| s.to_str()).unwrap_or("") {
        "json" => Ok(serde_json::from_str(&data)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(&data)?),
        "toml" => Ok(toml::from_str(&data)?),
        _ => Err(ConfigError::UnsupportedFormat),
    }
}

pub fn validate_config(config: &NodewardConfig) -> Result<(), ConfigError> {
    if config.nodes.is_empty() {
        return Err(ConfigError::Validation("no nodes configured".into()));
    }

    let mut seen = HashSet::new();
    for (i, node) in config.nodes.iter().enumerate() {
        let panel = &node.panel;
        if panel.api_host.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "nodes[{i}].panel.api_host is empty"
            )));
        }
        if panel.api_key.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "nodes[{i}].panel.api_key is empty"
            )));
        }
        if !seen.insert((panel.api_host.as_str(), panel.node_id, panel.node_type)) {
            return Err(ConfigError::Validation(format!(
                "nodes[{i}]: node {} on {} is configured twice",
                panel.node_id, panel.api_host
            )));
        }

        let controller = &node.controller;
        if controller.listen_ip.parse::<std::net::IpAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "nodes[{i}].controller.listen_ip is not an IP address"
            )));
        }
        if controller.send_ip.parse::<std::net::IpAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "nodes[{i}].controller.send_ip is not an IP address"
            )));
        }
        let auto = &controller.auto_speed_limit;
        if auto.enabled() && (auto.limit_speed_mbps == 0 || auto.limit_duration_mins == 0) {
            return Err(ConfigError::Validation(format!(
                "nodes[{i}].controller.auto_speed_limit needs limit_speed_mbps and limit_duration_mins"
            )));
        }
    }
    Ok(())
}
