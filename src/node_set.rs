//! Every configured node, wired against one engine.

use std::sync::Arc;

use nodeward_controller::{CertRenewer, Controller, ControllerConfig, ControllerError, ProxyEngine};
use nodeward_limiter::{Limiter, MissingTablePolicy};
use nodeward_panel::{PanelApi, UniProxyClient};
use nodeward_rules::RuleManager;
use tracing::{error, info};

use crate::config::NodewardConfig;

/// One controller per node, sharing the engine, limiter and rule manager.
///
/// The data plane admits connections through [`NodeSet::limiter`] and
/// audits destinations through [`NodeSet::rules`].
pub struct NodeSet {
    engine: Arc<dyn ProxyEngine>,
    limiter: Arc<Limiter>,
    rules: Arc<RuleManager>,
    cert: Option<Arc<dyn CertRenewer>>,
    controllers: Vec<Controller>,
}

impl NodeSet {
    pub fn new(engine: Arc<dyn ProxyEngine>, policy: MissingTablePolicy) -> Self {
        Self {
            engine,
            limiter: Arc::new(Limiter::new().with_missing_table_policy(policy)),
            rules: Arc::new(RuleManager::new()),
            cert: None,
            controllers: Vec::new(),
        }
    }

    /// Renewer handed to nodes added after this call.
    pub fn with_cert_renewer(mut self, renewer: Arc<dyn CertRenewer>) -> Self {
        self.cert = Some(renewer);
        self
    }

    /// Build a UniProxy client and controller for every configured node.
    pub fn from_config(
        config: &NodewardConfig,
        engine: Arc<dyn ProxyEngine>,
        renewer: Option<Arc<dyn CertRenewer>>,
    ) -> Result<Self, ControllerError> {
        let mut set = Self::new(engine, config.missing_table_policy);
        set.cert = renewer;
        for node in &config.nodes {
            let client = UniProxyClient::new(node.panel.clone())?;
            set.add_node(Arc::new(client), node.controller.clone());
        }
        Ok(set)
    }

    pub fn add_node(&mut self, panel: Arc<dyn PanelApi>, config: ControllerConfig) {
        let mut builder = Controller::builder(
            panel,
            Arc::clone(&self.engine),
            Arc::clone(&self.limiter),
            Arc::clone(&self.rules),
            config,
        );
        if let Some(renewer) = &self.cert {
            builder = builder.cert_renewer(Arc::clone(renewer));
        }
        self.controllers.push(builder.build());
    }

    pub fn limiter(&self) -> &Arc<Limiter> {
        &self.limiter
    }

    pub fn rules(&self) -> &Arc<RuleManager> {
        &self.rules
    }

    pub fn controllers(&self) -> &[Controller] {
        &self.controllers
    }

    /// Start every controller in order, stopping at the first failure.
    pub async fn start_all(&self) -> Result<(), ControllerError> {
        for controller in &self.controllers {
            if let Err(e) = controller.start().await {
                let client = controller.client();
                error!(
                    panel = %client.api_host,
                    node_id = client.node_id,
                    error = %e,
                    "controller failed to start"
                );
                return Err(e);
            }
        }
        info!(nodes = self.controllers.len(), "all controllers started");
        Ok(())
    }

    pub async fn close_all(&self) {
        for controller in &self.controllers {
            controller.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::net::IpAddr;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use nodeward_controller::{
        EngineError, InboundConfig, OutboundConfig, Phase, TrafficSample, UserCredential,
    };
    use nodeward_core::{
        ClientInfo, NodeInfo, NodeStatus, NodeType, OnlineUser, UserInfo, UserTraffic,
        build_user_tag,
    };
    use nodeward_panel::PanelError;
    use nodeward_rules::{DetectResult, DetectRule};

    use super::*;

    struct StaticPanel {
        node: NodeInfo,
        users: Vec<UserInfo>,
        available: bool,
    }

    #[async_trait]
    impl PanelApi for StaticPanel {
        fn describe(&self) -> ClientInfo {
            ClientInfo {
                api_host: "http://panel.test".into(),
                node_id: self.node.node_id,
                node_type: self.node.node_type,
            }
        }

        async fn get_node_info(&self) -> Result<NodeInfo, PanelError> {
            if self.available {
                Ok(self.node.clone())
            } else {
                Err(PanelError::InvalidResponse("down".into()))
            }
        }

        async fn get_user_list(&self) -> Result<Vec<UserInfo>, PanelError> {
            Ok(self.users.clone())
        }

        async fn report_user_traffic(&self, _: &[UserTraffic]) -> Result<(), PanelError> {
            Ok(())
        }

        async fn get_node_rules(&self) -> Result<Vec<DetectRule>, PanelError> {
            Ok(vec![DetectRule::new(1, r"blocked\.test").unwrap()])
        }

        async fn report_online_users(&self, _: &[OnlineUser]) -> Result<(), PanelError> {
            Ok(())
        }

        async fn report_illegal(&self, _: &[DetectResult]) -> Result<(), PanelError> {
            Ok(())
        }

        async fn report_node_status(&self, _: &NodeStatus) -> Result<(), PanelError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingEngine {
        inbounds: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl ProxyEngine for RecordingEngine {
        async fn add_inbound(&self, config: &InboundConfig) -> Result<(), EngineError> {
            self.inbounds.lock().unwrap().insert(config.tag.clone());
            Ok(())
        }

        async fn remove_inbound(&self, tag: &str) -> Result<(), EngineError> {
            self.inbounds.lock().unwrap().remove(tag);
            Ok(())
        }

        async fn add_outbound(&self, _: &OutboundConfig) -> Result<(), EngineError> {
            Ok(())
        }

        async fn remove_outbound(&self, _: &str) -> Result<(), EngineError> {
            Ok(())
        }

        async fn add_users(&self, _: &str, _: &[UserCredential]) -> Result<(), EngineError> {
            Ok(())
        }

        async fn remove_users(&self, _: &str, _: &[String]) -> Result<(), EngineError> {
            Ok(())
        }

        async fn peek_traffic(&self, _: &str) -> Result<TrafficSample, EngineError> {
            Ok(TrafficSample::default())
        }

        async fn reset_traffic(&self, _: &str, _: TrafficSample) -> Result<(), EngineError> {
            Ok(())
        }
    }

    fn user(uid: u32, device_limit: u32) -> UserInfo {
        UserInfo {
            uid,
            email: format!("uuid-{uid}@v2board.user"),
            uuid: format!("uuid-{uid}"),
            device_limit,
            ..Default::default()
        }
    }

    fn panel(node_type: NodeType, id: u32, port: u16, available: bool) -> Arc<StaticPanel> {
        Arc::new(StaticPanel {
            node: NodeInfo::new(node_type, id, port),
            users: vec![user(1, 1)],
            available,
        })
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([198, 51, 100, last])
    }

    #[tokio::test]
    async fn nodes_share_limiter_and_rules() {
        let engine = Arc::new(RecordingEngine::default());
        let mut set = NodeSet::new(engine.clone(), MissingTablePolicy::Allow);
        set.add_node(panel(NodeType::Trojan, 1, 443, true), ControllerConfig::default());
        set.add_node(panel(NodeType::Shadowsocks, 2, 8388, true), ControllerConfig::default());

        set.start_all().await.unwrap();
        let trojan = "Trojan_0.0.0.0_443";
        let ss = "Shadowsocks_0.0.0.0_8388";
        assert_eq!(
            *engine.inbounds.lock().unwrap(),
            [trojan.to_string(), ss.to_string()].into()
        );
        assert!(set.limiter().contains(trojan) && set.limiter().contains(ss));

        // device limits are per tag
        let trojan_user = build_user_tag(trojan, &user(1, 1));
        let ss_user = build_user_tag(ss, &user(1, 1));
        assert!(!set.limiter().admit(trojan, &trojan_user, ip(1)).reject);
        assert!(set.limiter().admit(trojan, &trojan_user, ip(2)).reject);
        assert!(!set.limiter().admit(ss, &ss_user, ip(2)).reject);

        assert!(set.rules().detect(ss, "cdn.blocked.test", &ss_user));

        set.close_all().await;
        assert!(set.controllers().iter().all(|c| c.phase() == Phase::Closed));
    }

    #[tokio::test]
    async fn start_all_stops_at_first_failure() {
        let engine = Arc::new(RecordingEngine::default());
        let mut set = NodeSet::new(engine.clone(), MissingTablePolicy::Reject);
        set.add_node(panel(NodeType::Trojan, 1, 443, false), ControllerConfig::default());
        set.add_node(panel(NodeType::Trojan, 2, 444, true), ControllerConfig::default());

        assert!(set.start_all().await.is_err());
        assert!(engine.inbounds.lock().unwrap().is_empty());
        assert_eq!(set.controllers()[1].phase(), Phase::Uninitialized);

        // unknown tags follow the configured policy
        assert!(set.limiter().admit("nope", "nope|x|1", ip(1)).reject);
    }
}
