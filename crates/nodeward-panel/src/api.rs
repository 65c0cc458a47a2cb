//! Panel API trait.

use std::sync::Arc;

use async_trait::async_trait;
use nodeward_core::{ClientInfo, NodeInfo, NodeStatus, OnlineUser, UserInfo, UserTraffic};
use nodeward_rules::{DetectResult, DetectRule};

use crate::error::PanelError;

/// Contract between the controller and a panel.
///
/// Implementations must be thread-safe (`Send + Sync`): the controller's
/// periodic tasks call into the same client concurrently.
#[async_trait]
pub trait PanelApi: Send + Sync {
    /// Identity of this client, for log context.
    fn describe(&self) -> ClientInfo;

    /// Pull the node descriptor.
    async fn get_node_info(&self) -> Result<NodeInfo, PanelError>;

    /// Pull the user list.
    ///
    /// Returns [`PanelError::NoChange`] when the panel reports the list is
    /// unchanged since the previous successful pull.
    async fn get_user_list(&self) -> Result<Vec<UserInfo>, PanelError>;

    /// Push per-user traffic for one interval.
    async fn report_user_traffic(&self, traffic: &[UserTraffic]) -> Result<(), PanelError>;

    /// Pull the panel's audit rules.
    async fn get_node_rules(&self) -> Result<Vec<DetectRule>, PanelError>;

    /// Push the (user, address) pairs seen during the interval.
    async fn report_online_users(&self, users: &[OnlineUser]) -> Result<(), PanelError>;

    /// Push audit detections.
    async fn report_illegal(&self, results: &[DetectResult]) -> Result<(), PanelError>;

    /// Push host load.
    async fn report_node_status(&self, status: &NodeStatus) -> Result<(), PanelError>;
}

/// Blanket implementation for `Arc<P>` where `P: PanelApi`.
#[async_trait]
impl<P: PanelApi + ?Sized> PanelApi for Arc<P> {
    #[inline]
    fn describe(&self) -> ClientInfo {
        (**self).describe()
    }

    #[inline]
    async fn get_node_info(&self) -> Result<NodeInfo, PanelError> {
        (**self).get_node_info().await
    }

    #[inline]
    async fn get_user_list(&self) -> Result<Vec<UserInfo>, PanelError> {
        (**self).get_user_list().await
    }

    #[inline]
    async fn report_user_traffic(&self, traffic: &[UserTraffic]) -> Result<(), PanelError> {
        (**self).report_user_traffic(traffic).await
    }

    #[inline]
    async fn get_node_rules(&self) -> Result<Vec<DetectRule>, PanelError> {
        (**self).get_node_rules().await
    }

    #[inline]
    async fn report_online_users(&self, users: &[OnlineUser]) -> Result<(), PanelError> {
        (**self).report_online_users(users).await
    }

    #[inline]
    async fn report_illegal(&self, results: &[DetectResult]) -> Result<(), PanelError> {
        (**self).report_illegal(results).await
    }

    #[inline]
    async fn report_node_status(&self, status: &NodeStatus) -> Result<(), PanelError> {
        (**self).report_node_status(status).await
    }
}
