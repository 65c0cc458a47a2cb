//! Translate panel state into engine configuration.

use std::net::IpAddr;

use nodeward_core::{NodeInfo, NodeType, UserInfo, build_user_tag};

use crate::config::ControllerConfig;
use crate::engine::{
    Credential, InboundConfig, OutboundConfig, Protocol, TlsSettings, UserCredential,
};
use crate::error::ControllerError;

fn parse_ip(field: &str, value: &str) -> Result<IpAddr, ControllerError> {
    value
        .parse()
        .map_err(|_| ControllerError::Config(format!("invalid {field}: {value}")))
}

fn protocol_for(node: &NodeInfo) -> Protocol {
    match node.node_type {
        NodeType::V2ray if node.enable_vless => Protocol::Vless,
        NodeType::V2ray => Protocol::Vmess,
        NodeType::Trojan => Protocol::Trojan,
        NodeType::Shadowsocks => Protocol::Shadowsocks,
    }
}

/// Inbound for `node` under `tag`. `tls` is `None` when the node runs plaintext.
pub fn build_inbound(
    node: &NodeInfo,
    config: &ControllerConfig,
    tag: &str,
    tls: Option<TlsSettings>,
) -> Result<InboundConfig, ControllerError> {
    Ok(InboundConfig {
        tag: tag.to_string(),
        listen: parse_ip("listen_ip", &config.listen_ip)?,
        port: node.port,
        protocol: protocol_for(node),
        transport: node.transport.clone(),
        path: node.path.clone(),
        host: node.host.clone(),
        service_name: node.service_name.clone(),
        header: node.header.clone(),
        tls,
        sniffing: !config.disable_sniffing,
        proxy_protocol: config.enable_proxy_protocol,
        cipher: node.cipher.clone(),
        server_key: node.server_key.clone(),
    })
}

pub fn build_outbound(config: &ControllerConfig, tag: &str) -> Result<OutboundConfig, ControllerError> {
    Ok(OutboundConfig {
        tag: tag.to_string(),
        send_through: parse_ip("send_ip", &config.send_ip)?,
    })
}

fn or_fallback(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

/// Engine credentials for `users` on the inbound `tag`.
pub fn build_credentials(node: &NodeInfo, tag: &str, users: &[UserInfo]) -> Vec<UserCredential> {
    let protocol = protocol_for(node);
    users
        .iter()
        .map(|user| {
            let credential = match protocol {
                Protocol::Vmess => Credential::Vmess {
                    uuid: user.uuid.clone(),
                    alter_id: user.alter_id,
                },
                Protocol::Vless => Credential::Vless {
                    uuid: user.uuid.clone(),
                    flow: or_fallback(&user.flow, &node.vless_flow),
                },
                Protocol::Trojan => Credential::Trojan {
                    password: or_fallback(&user.passwd, &user.uuid),
                },
                Protocol::Shadowsocks => Credential::Shadowsocks {
                    password: or_fallback(&user.passwd, &user.uuid),
                    cipher: or_fallback(&user.cipher, &node.cipher),
                },
            };
            UserCredential {
                user_tag: build_user_tag(tag, user),
                uid: user.uid,
                credential,
            }
        })
        .collect()
}
