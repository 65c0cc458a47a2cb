//! Panel-facing data model.
//!
//! These values are produced by a panel client on every pull and are
//! immutable once handed to the limiter or the proxy engine. Equality is
//! deep: two snapshots compare equal only when every field matches.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Protocol family served by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    V2ray,
    Trojan,
    Shadowsocks,
}

impl NodeType {
    /// Name as it appears in tags and panel query strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::V2ray => "V2ray",
            NodeType::Trojan => "Trojan",
            NodeType::Shadowsocks => "Shadowsocks",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown node type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownNodeType(pub String);

impl fmt::Display for UnknownNodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported node type: {}", self.0)
    }
}

impl std::error::Error for UnknownNodeType {}

impl std::str::FromStr for NodeType {
    type Err = UnknownNodeType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v2ray" | "vmess" | "vless" => Ok(NodeType::V2ray),
            "trojan" => Ok(NodeType::Trojan),
            "shadowsocks" | "ss" => Ok(NodeType::Shadowsocks),
            _ => Err(UnknownNodeType(s.to_string())),
        }
    }
}

/// Descriptor of the inbound a node serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_type: NodeType,
    pub node_id: u32,
    pub port: u16,
    /// Node-wide speed limit in bytes/second (0 = unlimited).
    pub speed_limit: u64,
    pub alter_id: u16,
    /// Transport name (`tcp`, `ws`, `grpc`, ...).
    pub transport: String,
    pub host: String,
    pub path: String,
    pub service_name: String,
    pub enable_tls: bool,
    pub tls_type: String,
    pub enable_vless: bool,
    pub vless_flow: String,
    /// Shadowsocks cipher.
    pub cipher: String,
    /// Shadowsocks 2022 server key.
    pub server_key: String,
    /// Raw transport header JSON, when the panel sends one.
    pub header: Option<String>,
}

impl NodeInfo {
    /// Minimal descriptor with every optional field empty.
    pub fn new(node_type: NodeType, node_id: u32, port: u16) -> Self {
        Self {
            node_type,
            node_id,
            port,
            speed_limit: 0,
            alter_id: 0,
            transport: "tcp".to_string(),
            host: String::new(),
            path: String::new(),
            service_name: String::new(),
            enable_tls: false,
            tls_type: String::new(),
            enable_vless: false,
            vless_flow: String::new(),
            cipher: String::new(),
            server_key: String::new(),
            header: None,
        }
    }
}

/// One user as delivered by the panel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserInfo {
    pub uid: u32,
    /// Synthetic per-panel identity; combined with the tag and uid into the user tag.
    pub email: String,
    pub uuid: String,
    pub passwd: String,
    pub cipher: String,
    pub alter_id: u16,
    pub flow: String,
    /// Bytes/second (0 = unlimited).
    pub speed_limit: u64,
    /// Maximum distinct source IPs per interval (0 = unlimited).
    pub device_limit: u32,
}

/// Traffic moved by one user during one interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTraffic {
    pub uid: u32,
    pub email: String,
    pub upload: u64,
    pub download: u64,
}

/// A (user, source IP) pair observed since the previous drain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OnlineUser {
    pub uid: u32,
    pub ip: IpAddr,
}

/// Host load snapshot reported to the panel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// CPU usage percent.
    pub cpu: f64,
    /// Memory usage percent.
    pub mem: f64,
    /// Root disk usage percent.
    pub disk: f64,
    /// Host uptime in seconds.
    pub uptime: u64,
}

/// Identity of a panel client, used for log context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub api_host: String,
    pub node_id: u32,
    pub node_type: NodeType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_type_parse_and_display() {
        assert_eq!("trojan".parse::<NodeType>().unwrap(), NodeType::Trojan);
        assert_eq!("V2ray".parse::<NodeType>().unwrap(), NodeType::V2ray);
        assert_eq!("ss".parse::<NodeType>().unwrap(), NodeType::Shadowsocks);
        assert!("hysteria".parse::<NodeType>().is_err());
        assert_eq!(NodeType::Shadowsocks.to_string(), "Shadowsocks");
    }

    #[test]
    fn node_type_serde_uses_variant_names() {
        let json = serde_json::to_string(&NodeType::Trojan).unwrap();
        assert_eq!(json, "\"Trojan\"");
        let parsed: NodeType = serde_json::from_str("\"V2ray\"").unwrap();
        assert_eq!(parsed, NodeType::V2ray);
    }

    #[test]
    fn user_equality_covers_limits() {
        let a = UserInfo {
            uid: 1,
            email: "a@example".into(),
            speed_limit: 100,
            ..Default::default()
        };
        let mut b = a.clone();
        assert_eq!(a, b);
        b.device_limit = 2;
        assert_ne!(a, b);
    }
}
