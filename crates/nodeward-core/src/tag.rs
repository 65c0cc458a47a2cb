//! Tag derivation.
//!
//! A node tag identifies one inbound/outbound pair in the proxy engine and
//! keys the limiter and rule tables. A user tag (`{tag}|{email}|{uid}`)
//! identifies one user under one inbound.

use crate::model::{NodeType, UserInfo};

/// Build the tag for an inbound from its protocol family, listen address and port.
pub fn build_node_tag(node_type: NodeType, listen_ip: &str, port: u16) -> String {
    format!("{node_type}_{listen_ip}_{port}")
}

/// Build the per-inbound user key.
pub fn build_user_tag(tag: &str, user: &UserInfo) -> String {
    format!("{tag}|{}|{}", user.email, user.uid)
}

/// Extract the uid from a user tag (the segment after the last `|`).
pub fn parse_user_tag_uid(user_tag: &str) -> Option<u32> {
    let (_, uid) = user_tag.rsplit_once('|')?;
    uid.parse().ok()
}

/// Strip the node tag from a user tag, leaving `{email}|{uid}`.
///
/// This is the node-independent identity used for cluster-wide keys.
pub fn user_key(user_tag: &str) -> &str {
    match user_tag.split_once('|') {
        Some((_, rest)) => rest,
        None => user_tag,
    }
}
