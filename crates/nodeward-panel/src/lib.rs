//! Panel API contract and clients.
//!
//! A panel is the remote authority a node pulls its configuration and user
//! list from and reports usage to. The controller talks to it only through
//! [`PanelApi`]; [`UniProxyClient`] is the HTTP implementation for panels
//! exposing the `/api/v1/server/UniProxy` endpoints.

pub mod api;
pub mod config;
pub mod error;
pub mod uniproxy;

pub use api::PanelApi;
pub use config::PanelConfig;
pub use error::PanelError;
pub use uniproxy::{ServerConfig, UniProxyClient};
