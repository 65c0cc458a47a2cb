//! UniProxy HTTP panel client.
//!
//! Endpoints (all under `{api_host}/api/v1/server/UniProxy`, authenticated
//! with the `node_id`, `node_type` and `token` query parameters):
//!
//! - `GET /config` – node descriptor and routes
//! - `GET /user` – user list, conditional on `If-None-Match`
//! - `POST /push` – traffic as `{uid: [upload, download]}`
//!
//! Every fetch returns an owned [`ServerConfig`] snapshot; parsing takes
//! the snapshot as a parameter, so nothing is cached between calls except
//! the user-list ETag.

use std::collections::HashMap;

use async_trait::async_trait;
use nodeward_core::{
    ClientInfo, NodeInfo, NodeStatus, NodeType, OnlineUser, UserInfo, UserTraffic,
    mbps_to_bytes_per_sec,
};
use nodeward_rules::{DetectResult, DetectRule};
use parking_lot::Mutex;
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::api::PanelApi;
use crate::config::PanelConfig;
use crate::error::PanelError;

const CONFIG_PATH: &str = "/api/v1/server/UniProxy/config";
const USER_PATH: &str = "/api/v1/server/UniProxy/user";
const PUSH_PATH: &str = "/api/v1/server/UniProxy/push";

/// Suffix of the synthetic per-user email.
const EMAIL_DOMAIN: &str = "v2board.user";

// ── Wire types ────────────────────────────────────────────────────

/// Immutable snapshot of the `/config` payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server_port: u16,
    pub network: String,
    #[serde(rename = "networkSettings")]
    pub network_settings: NetworkSettings,
    pub tls: u8,
    pub host: String,
    pub server_name: String,
    pub cipher: String,
    pub server_key: String,
    pub obfs: String,
    pub obfs_settings: ObfsSettings,
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub path: String,
    pub headers: Option<serde_json::Value>,
    #[serde(rename = "serviceName")]
    pub service_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ObfsSettings {
    pub path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Route {
    pub id: Option<i32>,
    #[serde(rename = "match")]
    pub matches: RouteMatch,
    pub action: String,
    pub action_value: Option<String>,
}

/// Panels send `match` either as a list or as a single comma-separated string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RouteMatch {
    List(Vec<String>),
    Single(String),
}

impl Default for RouteMatch {
    fn default() -> Self {
        RouteMatch::List(Vec::new())
    }
}

impl RouteMatch {
    fn patterns(&self) -> Vec<&str> {
        match self {
            RouteMatch::List(items) => items.iter().map(String::as_str).collect(),
            RouteMatch::Single(s) => s.split(',').collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserListResponse {
    #[serde(default)]
    users: Vec<WireUser>,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: u32,
    uuid: String,
    #[serde(default)]
    speed_limit: Option<f64>,
}

// ── Client ────────────────────────────────────────────────────────

/// HTTP client for UniProxy-compatible panels.
#[derive(Debug)]
pub struct UniProxyClient {
    client: Client,
    config: PanelConfig,
    base: String,
    etag: Mutex<Option<String>>,
}

impl UniProxyClient {
    /// Build a client with the configured request timeout.
    pub fn new(config: PanelConfig) -> Result<Self, PanelError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self::with_client(client, config))
    }

    /// Build with a custom reqwest [`Client`].
    pub fn with_client(client: Client, config: PanelConfig) -> Self {
        let base = config.api_host.trim_end_matches('/').to_string();
        Self {
            client,
            config,
            base,
            etag: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    fn auth_query(&self) -> [(&'static str, String); 3] {
        [
            ("node_id", self.config.node_id.to_string()),
            (
                "node_type",
                self.config.node_type.as_str().to_ascii_lowercase(),
            ),
            ("token", self.config.api_key.clone()),
        ]
    }

    async fn decode<T: DeserializeOwned>(
        url: String,
        resp: reqwest::Response,
    ) -> Result<T, PanelError> {
        let status = resp.status();
        if status.as_u16() > 399 {
            let body = resp.text().await.unwrap_or_default();
            return Err(PanelError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Fetch the `/config` snapshot.
    pub async fn fetch_server_config(&self) -> Result<ServerConfig, PanelError> {
        let url = self.url(CONFIG_PATH);
        let resp = self
            .client
            .get(&url)
            .query(&self.auth_query())
            .send()
            .await?;
        let server: ServerConfig = Self::decode(url, resp).await?;
        if server.server_port == 0 {
            return Err(PanelError::InvalidResponse(
                "server port must be > 0".to_string(),
            ));
        }
        Ok(server)
    }

    /// Turn a snapshot into a node descriptor for this client's node type.
    pub fn parse_node_info(&self, server: &ServerConfig) -> Result<NodeInfo, PanelError> {
        let mut node = NodeInfo::new(self.config.node_type, self.config.node_id, server.server_port);
        match self.config.node_type {
            NodeType::V2ray => {
                node.transport = server.network.clone();
                node.enable_tls = server.tls == 1;
                node.tls_type = "tls".to_string();
                node.path = server.network_settings.path.clone();
                node.service_name = server.network_settings.service_name.clone();
                node.enable_vless = self.config.enable_vless;
                node.vless_flow = self.config.vless_flow.clone();
                if let Some(headers) = &server.network_settings.headers {
                    match server.network.as_str() {
                        "ws" => {
                            node.host = headers
                                .get("Host")
                                .and_then(|h| h.as_str())
                                .unwrap_or_default()
                                .to_string();
                        }
                        "tcp" => node.header = Some(serde_json::to_string(headers)?),
                        _ => {}
                    }
                }
            }
            NodeType::Trojan => {
                node.enable_tls = true;
                node.tls_type = "tls".to_string();
                node.host = server.host.clone();
                node.service_name = server.server_name.clone();
            }
            NodeType::Shadowsocks => {
                node.cipher = server.cipher.clone();
                node.server_key = server.server_key.clone();
                if server.obfs == "http" {
                    let path = match server.obfs_settings.path.as_str() {
                        "" => "/".to_string(),
                        p if p.starts_with('/') => p.to_string(),
                        p => format!("/{p}"),
                    };
                    let header = serde_json::json!({
                        "type": "http",
                        "request": { "path": [path] },
                    });
                    node.header = Some(header.to_string());
                }
            }
        }
        Ok(node)
    }

    /// Extract audit rules from a snapshot: every `block` route becomes one
    /// rule whose pattern is the route's matches joined with `|`.
    pub fn parse_rules(server: &ServerConfig) -> Vec<DetectRule> {
        let mut rules = Vec::new();
        for (index, route) in server.routes.iter().enumerate() {
            if route.action != "block" {
                continue;
            }
            let patterns = route.matches.patterns();
            if patterns.is_empty() {
                continue;
            }
            let id = route
                .id
                .unwrap_or_else(|| i32::try_from(index).unwrap_or(i32::MAX));
            match DetectRule::new(id, &patterns.join("|")) {
                Ok(rule) => rules.push(rule),
                Err(e) => warn!(route = id, error = %e, "skipping invalid block route"),
            }
        }
        rules
    }

    fn parse_users(&self, users: Vec<WireUser>) -> Vec<UserInfo> {
        let override_limit = mbps_to_bytes_per_sec(self.config.speed_limit_mbps);
        users
            .into_iter()
            .map(|u| {
                let speed_limit = if override_limit > 0 {
                    override_limit
                } else {
                    mbps_to_bytes_per_sec(u.speed_limit.unwrap_or_default())
                };
                let passwd = match self.config.node_type {
                    NodeType::Shadowsocks | NodeType::Trojan => u.uuid.clone(),
                    NodeType::V2ray => String::new(),
                };
                let flow = if self.config.enable_vless {
                    self.config.vless_flow.clone()
                } else {
                    String::new()
                };
                UserInfo {
                    uid: u.id,
                    email: format!("{}@{EMAIL_DOMAIN}", u.uuid),
                    uuid: u.uuid,
                    passwd,
                    cipher: String::new(),
                    alter_id: 0,
                    flow,
                    speed_limit,
                    device_limit: self.config.device_limit,
                }
            })
            .collect()
    }
}

#[async_trait]
impl PanelApi for UniProxyClient {
    fn describe(&self) -> ClientInfo {
        ClientInfo {
            api_host: self.config.api_host.clone(),
            node_id: self.config.node_id,
            node_type: self.config.node_type,
        }
    }

    async fn get_node_info(&self) -> Result<NodeInfo, PanelError> {
        let server = self.fetch_server_config().await?;
        self.parse_node_info(&server)
    }

    async fn get_user_list(&self) -> Result<Vec<UserInfo>, PanelError> {
        let url = self.url(USER_PATH);
        let etag = self.etag.lock().clone();
        let mut req = self.client.get(&url).query(&self.auth_query());
        if let Some(tag) = etag.as_deref() {
            req = req.header(header::IF_NONE_MATCH, tag);
        }
        let resp = req.send().await?;

        if resp.status() == StatusCode::NOT_MODIFIED {
            return Err(PanelError::NoChange);
        }
        let new_etag = resp
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let list: UserListResponse = Self::decode(url, resp).await?;
        if let Some(tag) = new_etag {
            *self.etag.lock() = Some(tag);
        }
        Ok(self.parse_users(list.users))
    }

    async fn report_user_traffic(&self, traffic: &[UserTraffic]) -> Result<(), PanelError> {
        let url = self.url(PUSH_PATH);
        let body: HashMap<u32, [u64; 2]> = traffic
            .iter()
            .map(|t| (t.uid, [t.upload, t.download]))
            .collect();
        let resp = self
            .client
            .post(&url)
            .query(&self.auth_query())
            .json(&body)
            .send()
            .await?;
        let _: serde_json::Value = Self::decode(url, resp).await?;
        Ok(())
    }

    async fn get_node_rules(&self) -> Result<Vec<DetectRule>, PanelError> {
        let server = self.fetch_server_config().await?;
        Ok(Self::parse_rules(&server))
    }

    async fn report_online_users(&self, users: &[OnlineUser]) -> Result<(), PanelError> {
        debug!(count = users.len(), "online user report not supported by this panel");
        Ok(())
    }

    async fn report_illegal(&self, results: &[DetectResult]) -> Result<(), PanelError> {
        debug!(count = results.len(), "illegal report not supported by this panel");
        Ok(())
    }

    async fn report_node_status(&self, _status: &NodeStatus) -> Result<(), PanelError> {
        Ok(())
    }
}
