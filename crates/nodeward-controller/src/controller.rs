//! Per-node reconciliation controller.
//!
//! A [`Controller`] owns one tag in the proxy engine, limiter and rule
//! manager. [`Controller::start`] performs the initial sync; afterwards
//! independent periodic tasks keep engine state converged with the panel
//! and report usage back.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use nodeward_core::{
    ClientInfo, NodeInfo, UserInfo, UserTraffic, build_node_tag, build_user_tag, metrics,
};
use nodeward_limiter::{GlobalDeviceLimit, Limiter};
use nodeward_panel::PanelApi;
use nodeward_rules::{DetectRule, RuleManager, load_rule_file};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, info_span, warn};

use crate::builder::{build_credentials, build_inbound, build_outbound};
use crate::cert::{CertError, CertMode, CertRenewer};
use crate::config::ControllerConfig;
use crate::diff::compare_user_lists;
use crate::engine::{CertPaths, ProxyEngine, TlsSettings, TrafficSample};
use crate::error::ControllerError;
use crate::status::{StatusProbe, SystemProbe};
use crate::throttle::AutoThrottle;

/// Lifecycle of a [`Controller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Active,
    Closed,
}

/// What one reconciliation cycle changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Unchanged,
    UsersUpdated { added: usize, removed: usize },
    NodeChanged { old_tag: String, new_tag: String },
}

/// Last state successfully applied to the engine.
#[derive(Debug)]
struct Snapshot {
    node: NodeInfo,
    tag: String,
    users: Vec<UserInfo>,
}

struct Inner {
    panel: Arc<dyn PanelApi>,
    engine: Arc<dyn ProxyEngine>,
    limiter: Arc<Limiter>,
    rules: Arc<RuleManager>,
    cert: Option<Arc<dyn CertRenewer>>,
    probe: Arc<dyn StatusProbe>,
    config: ControllerConfig,
    client: ClientInfo,
    span: Span,
    local_rules: Vec<DetectRule>,
    current: RwLock<Option<Arc<Snapshot>>>,
    /// Serializes start and node/user reconciliation.
    reconcile_lock: tokio::sync::Mutex<()>,
    throttle: Mutex<Option<AutoThrottle>>,
    /// Last sample fed to the throttle per user tag, until the engine
    /// counter is reset.
    throttle_seen: Mutex<HashMap<String, TrafficSample>>,
    global: RwLock<Option<GlobalDeviceLimit>>,
}

/// Builder for [`Controller`].
pub struct ControllerBuilder {
    panel: Arc<dyn PanelApi>,
    engine: Arc<dyn ProxyEngine>,
    limiter: Arc<Limiter>,
    rules: Arc<RuleManager>,
    config: ControllerConfig,
    cert: Option<Arc<dyn CertRenewer>>,
    probe: Option<Arc<dyn StatusProbe>>,
    global: Option<GlobalDeviceLimit>,
}

impl ControllerBuilder {
    /// Collaborator used for `http`, `dns` and `tls` certificate modes.
    pub fn cert_renewer(mut self, renewer: Arc<dyn CertRenewer>) -> Self {
        self.cert = Some(renewer);
        self
    }

    pub fn status_probe(mut self, probe: Arc<dyn StatusProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Use this shared device store instead of connecting one from
    /// `global_device_limit` at start.
    pub fn global_device_limit(mut self, global: GlobalDeviceLimit) -> Self {
        self.global = Some(global);
        self
    }

    pub fn build(self) -> Controller {
        let client = self.panel.describe();
        let span = info_span!(
            "controller",
            panel = %client.api_host,
            node_type = %client.node_type,
            node_id = client.node_id
        );

        let local_rules = match &self.config.rule_list_path {
            Some(path) => match load_rule_file(path) {
                Ok(rules) => rules,
                Err(e) => {
                    warn!(parent: &span, path = %path.display(), error = %e, "failed to load local rule file");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let throttle =
            AutoThrottle::from_config(&self.config.auto_speed_limit, self.config.update_periodic());

        Controller {
            inner: Arc::new(Inner {
                panel: self.panel,
                engine: self.engine,
                limiter: self.limiter,
                rules: self.rules,
                cert: self.cert,
                probe: self.probe.unwrap_or_else(|| Arc::new(SystemProbe::new())),
                config: self.config,
                client,
                span,
                local_rules,
                current: RwLock::new(None),
                reconcile_lock: tokio::sync::Mutex::new(()),
                throttle: Mutex::new(throttle),
                throttle_seen: Mutex::new(HashMap::new()),
                global: RwLock::new(self.global),
            }),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            phase: Mutex::new(Phase::Uninitialized),
        }
    }
}

/// Drives one panel node into the proxy engine.
pub struct Controller {
    inner: Arc<Inner>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    phase: Mutex<Phase>,
}

impl Controller {
    pub fn builder(
        panel: Arc<dyn PanelApi>,
        engine: Arc<dyn ProxyEngine>,
        limiter: Arc<Limiter>,
        rules: Arc<RuleManager>,
        config: ControllerConfig,
    ) -> ControllerBuilder {
        ControllerBuilder {
            panel,
            engine,
            limiter,
            rules,
            config,
            cert: None,
            probe: None,
            global: None,
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    pub fn client(&self) -> &ClientInfo {
        &self.inner.client
    }

    /// Tag currently installed, once started.
    pub fn tag(&self) -> Option<String> {
        self.inner.snapshot().map(|s| s.tag.clone())
    }

    pub fn node_info(&self) -> Option<NodeInfo> {
        self.inner.snapshot().map(|s| s.node.clone())
    }

    pub fn users(&self) -> Vec<UserInfo> {
        self.inner
            .snapshot()
            .map(|s| s.users.clone())
            .unwrap_or_default()
    }

    pub fn local_rules(&self) -> &[DetectRule] {
        &self.inner.local_rules
    }

    /// Initial sync, then schedule the periodic tasks.
    ///
    /// Fails without leaving anything installed when the node descriptor or
    /// user list cannot be fetched or the engine rejects the initial
    /// inbound, outbound or users.
    pub async fn start(&self) -> Result<(), ControllerError> {
        let inner = Arc::clone(&self.inner);
        let span = inner.span.clone();
        async {
            let _guard = inner.reconcile_lock.lock().await;
            match self.phase() {
                Phase::Uninitialized => {}
                Phase::Active => return Err(ControllerError::InvalidState("already started")),
                Phase::Closed => return Err(ControllerError::InvalidState("closed")),
            }

            inner.connect_global().await;
            let tag = inner.initial_sync().await?;

            // close() may have run while the initial sync was in flight
            {
                let mut phase = self.phase.lock();
                if *phase == Phase::Closed {
                    return Err(ControllerError::InvalidState("closed"));
                }
                *phase = Phase::Active;
            }
            self.spawn_tasks();
            info!(%tag, "controller started");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Run one node/user reconciliation cycle now.
    pub async fn reconcile(&self) -> Result<ReconcileOutcome, ControllerError> {
        self.require_active()?;
        self.inner
            .reconcile()
            .instrument(self.inner.span.clone())
            .await
    }

    /// Run one usage/report cycle now.
    pub async fn report_usage(&self) -> Result<(), ControllerError> {
        self.require_active()?;
        self.inner
            .report_usage()
            .instrument(self.inner.span.clone())
            .await;
        Ok(())
    }

    /// Run one certificate check now.
    pub async fn check_certificate(&self) -> Result<(), ControllerError> {
        self.require_active()?;
        self.inner
            .check_certificate()
            .instrument(self.inner.span.clone())
            .await;
        Ok(())
    }

    /// Stop the periodic tasks, letting in-flight runs finish. Idempotent.
    pub async fn close(&self) {
        {
            let mut phase = self.phase.lock();
            if *phase == Phase::Closed {
                return;
            }
            *phase = Phase::Closed;
        }
        self.shutdown.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            match task.await {
                Err(e) if e.is_panic() => {
                    warn!(parent: &self.inner.span, error = %e, "periodic task panicked");
                }
                _ => {}
            }
        }
        info!(parent: &self.inner.span, "controller closed");
    }

    fn require_active(&self) -> Result<(), ControllerError> {
        match self.phase() {
            Phase::Active => Ok(()),
            Phase::Uninitialized => Err(ControllerError::InvalidState("not started")),
            Phase::Closed => Err(ControllerError::InvalidState("closed")),
        }
    }

    fn spawn_tasks(&self) {
        let config = &self.inner.config;
        let period = config.update_periodic();

        self.spawn_periodic("node", period, |inner| async move {
            if let Err(e) = inner.reconcile().await {
                warn!(error = %e, "node reconciliation failed, retrying next cycle");
            }
        });
        self.spawn_periodic("usage", period, |inner| async move {
            inner.report_usage().await;
        });

        // the node may switch TLS on later; the check skips plaintext nodes
        if config.cert.mode.is_managed() {
            self.spawn_periodic("cert", config.cert_check_period(), |inner| async move {
                inner.check_certificate().await;
            });
        }
        if self.inner.global.read().is_some() {
            self.spawn_periodic("global-sync", period, |inner| async move {
                inner.sync_global_devices().await;
            });
        }
    }

    /// Run `f` every `period`, first after one full period.
    fn spawn_periodic<F, Fut>(&self, name: &'static str, period: Duration, f: F)
    where
        F: Fn(Arc<Inner>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let shutdown = self.shutdown.clone();
        let span = info_span!(parent: &self.inner.span, "task", task = name);

        let handle = tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        biased;

                        _ = shutdown.cancelled() => {
                            debug!("task stopped");
                            return;
                        }

                        _ = ticker.tick() => f(Arc::clone(&inner)).await,
                    }
                }
            }
            .instrument(span),
        );
        self.tasks.lock().push(handle);
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("client", &self.inner.client)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.current.read().clone()
    }

    fn store_snapshot(&self, node: NodeInfo, tag: String, users: Vec<UserInfo>) {
        *self.current.write() = Some(Arc::new(Snapshot { node, tag, users }));
    }

    fn global(&self) -> Option<GlobalDeviceLimit> {
        self.global.read().clone()
    }

    async fn connect_global(&self) {
        if self.global.read().is_some() {
            return;
        }
        match GlobalDeviceLimit::from_config(&self.config.global_device_limit).await {
            Ok(Some(global)) => {
                info!(addr = %self.config.global_device_limit.addr, "global device limit enabled");
                *self.global.write() = Some(global);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "global device store unavailable, enforcing local limits only"),
        }
    }

    /// Users as the limiter should see them, with active suspensions applied.
    fn throttled(&self, users: &[UserInfo]) -> Vec<UserInfo> {
        let throttle = self.throttle.lock();
        let Some(throttle) = throttle.as_ref() else {
            return users.to_vec();
        };
        users
            .iter()
            .map(|user| {
                let mut user = user.clone();
                throttle.apply(&mut user);
                user
            })
            .collect()
    }

    async fn initial_sync(&self) -> Result<String, ControllerError> {
        let node = self.panel.get_node_info().await?;
        let tag = build_node_tag(node.node_type, &self.config.listen_ip, node.port);
        self.add_endpoints(&node, &tag).await?;

        let users = match self.panel.get_user_list().await {
            Ok(users) => users,
            Err(e) if e.is_no_change() => Vec::new(),
            Err(e) => {
                self.remove_endpoints(&tag).await;
                return Err(e.into());
            }
        };
        if let Err(e) = self.add_users(&node, &tag, &users).await {
            self.remove_endpoints(&tag).await;
            return Err(e);
        }

        self.limiter
            .add_inbound_with_global(&tag, node.speed_limit, &users, self.global());
        self.refresh_rules(&tag).await;
        info!(%tag, users = users.len(), "node installed");
        self.store_snapshot(node, tag.clone(), users);
        Ok(tag)
    }

    async fn resolve_tls(&self, node: &NodeInfo) -> Result<Option<TlsSettings>, ControllerError> {
        if !node.enable_tls {
            return Ok(None);
        }
        let cert = &self.config.cert;
        let paths = match cert.mode {
            CertMode::None => return Err(CertError::Unsupported(CertMode::None).into()),
            CertMode::File => {
                if cert.cert_file.is_empty() || cert.key_file.is_empty() {
                    return Err(CertError::MissingFiles.into());
                }
                CertPaths {
                    cert_file: cert.cert_file.clone(),
                    key_file: cert.key_file.clone(),
                }
            }
            mode => {
                let renewer = self.cert.as_ref().ok_or(CertError::NoRenewer(mode))?;
                renewer.renew_certificate(&cert.request()).await?
            }
        };
        let server_name = if cert.domain.is_empty() {
            node.host.clone()
        } else {
            cert.domain.clone()
        };
        Ok(Some(TlsSettings {
            paths,
            server_name,
            reject_unknown_sni: cert.reject_unknown_sni,
        }))
    }

    async fn add_endpoints(&self, node: &NodeInfo, tag: &str) -> Result<(), ControllerError> {
        let tls = self.resolve_tls(node).await?;
        let inbound = build_inbound(node, &self.config, tag, tls)?;
        let outbound = build_outbound(&self.config, tag)?;

        self.engine.add_inbound(&inbound).await?;
        if let Err(e) = self.engine.add_outbound(&outbound).await {
            if let Err(e) = self.engine.remove_inbound(tag).await {
                warn!(%tag, error = %e, "failed to roll back inbound");
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove_endpoints(&self, tag: &str) {
        if let Err(e) = self.engine.remove_inbound(tag).await {
            warn!(%tag, error = %e, "failed to remove inbound");
        }
        if let Err(e) = self.engine.remove_outbound(tag).await {
            warn!(%tag, error = %e, "failed to remove outbound");
        }
    }

    async fn add_users(&self, node: &NodeInfo, tag: &str, users: &[UserInfo]) -> Result<(), ControllerError> {
        if users.is_empty() {
            return Ok(());
        }
        let credentials = build_credentials(node, tag, users);
        self.engine.add_users(tag, &credentials).await?;
        Ok(())
    }

    async fn reconcile(&self) -> Result<ReconcileOutcome, ControllerError> {
        let _guard = self.reconcile_lock.lock().await;
        let result = self.reconcile_locked().await;
        metrics::record_reconcile(result.is_ok());
        result
    }

    async fn reconcile_locked(&self) -> Result<ReconcileOutcome, ControllerError> {
        let current = self
            .snapshot()
            .ok_or(ControllerError::InvalidState("not started"))?;

        let node = self.panel.get_node_info().await?;
        let users = match self.panel.get_user_list().await {
            Ok(users) => Some(users),
            Err(e) if e.is_no_change() => None,
            Err(e) => return Err(e.into()),
        };

        let outcome = if node != current.node {
            let users = users.unwrap_or_else(|| current.users.clone());
            self.rebuild(&current, node, users).await?
        } else if let Some(users) = users {
            self.apply_user_diff(&current, users).await?
        } else {
            debug!("user list unchanged");
            ReconcileOutcome::Unchanged
        };

        if let Some(snapshot) = self.snapshot() {
            self.refresh_rules(&snapshot.tag).await;
        }
        Ok(outcome)
    }

    /// Replace the old tag with a fresh one carrying every user.
    async fn rebuild(
        &self,
        current: &Snapshot,
        node: NodeInfo,
        users: Vec<UserInfo>,
    ) -> Result<ReconcileOutcome, ControllerError> {
        let old_tag = current.tag.clone();
        info!(%old_tag, "node descriptor changed, rebuilding");

        self.remove_endpoints(&old_tag).await;
        self.limiter.remove_inbound(&old_tag);
        self.rules.remove_tag(&old_tag);

        let new_tag = build_node_tag(node.node_type, &self.config.listen_ip, node.port);
        self.add_endpoints(&node, &new_tag).await?;
        if let Err(e) = self.add_users(&node, &new_tag, &users).await {
            self.remove_endpoints(&new_tag).await;
            return Err(e);
        }
        self.limiter.add_inbound_with_global(
            &new_tag,
            node.speed_limit,
            &self.throttled(&users),
            self.global(),
        );
        info!(%new_tag, users = users.len(), "node rebuilt");
        self.store_snapshot(node, new_tag.clone(), users);
        Ok(ReconcileOutcome::NodeChanged { old_tag, new_tag })
    }

    async fn apply_user_diff(
        &self,
        current: &Snapshot,
        users: Vec<UserInfo>,
    ) -> Result<ReconcileOutcome, ControllerError> {
        let (removed, added) = compare_user_lists(&current.users, &users);
        if removed.is_empty() && added.is_empty() {
            return Ok(ReconcileOutcome::Unchanged);
        }
        let tag = &current.tag;

        if !removed.is_empty() {
            let user_tags: Vec<String> = removed.iter().map(|u| build_user_tag(tag, u)).collect();
            self.engine.remove_users(tag, &user_tags).await?;
            if let Err(e) = self.limiter.remove_users(tag, &user_tags) {
                warn!(%tag, error = %e, "failed to remove users from limiter");
            }
        }

        if !added.is_empty() {
            if let Err(e) = self.add_users(&current.node, tag, &added).await {
                // the engine no longer has the removed users; record that so
                // the next cycle only retries the additions
                let gone: HashSet<&UserInfo> = removed.iter().collect();
                let retained = current
                    .users
                    .iter()
                    .filter(|u| !gone.contains(u))
                    .cloned()
                    .collect();
                self.store_snapshot(current.node.clone(), tag.clone(), retained);
                return Err(e);
            }
            if let Err(e) = self.limiter.update_inbound(tag, &self.throttled(&added)) {
                warn!(%tag, error = %e, "failed to update limiter");
            }
        }

        info!(%tag, added = added.len(), removed = removed.len(), "users updated");
        let outcome = ReconcileOutcome::UsersUpdated {
            added: added.len(),
            removed: removed.len(),
        };
        self.store_snapshot(current.node.clone(), tag.clone(), users);
        Ok(outcome)
    }

    /// Local rules first, then the panel's. A failed fetch keeps whatever
    /// the tag already had.
    async fn refresh_rules(&self, tag: &str) {
        let mut rules = self.local_rules.clone();
        if !self.config.disable_get_rule {
            match self.panel.get_node_rules().await {
                Ok(remote) => rules.extend(remote),
                Err(e) => {
                    warn!(%tag, error = %e, "failed to fetch audit rules");
                    if self.rules.contains(tag) {
                        return;
                    }
                }
            }
        }
        let count = rules.len();
        if self.rules.update_rules(tag, rules) {
            info!(%tag, rules = count, "audit rules updated");
        }
    }

    async fn report_usage(&self) {
        let Some(current) = self.snapshot() else {
            return;
        };
        let tag = &current.tag;
        let now = Instant::now();

        self.restore_expired(now);

        let mut traffic = Vec::new();
        let mut samples: Vec<(String, TrafficSample)> = Vec::new();
        let mut limited = Vec::new();
        let mut peeked = HashSet::with_capacity(current.users.len());
        for user in &current.users {
            let user_tag = build_user_tag(tag, user);
            peeked.insert(user_tag.clone());
            let sample = match self.engine.peek_traffic(&user_tag).await {
                Ok(sample) => sample,
                Err(e) => {
                    debug!(%user_tag, error = %e, "failed to read traffic");
                    continue;
                }
            };
            {
                let mut throttle = self.throttle.lock();
                if let Some(throttle) = throttle.as_mut() {
                    // unreported bytes from earlier cycles were already observed
                    let seen = self
                        .throttle_seen
                        .lock()
                        .insert(user_tag.clone(), sample)
                        .unwrap_or_default();
                    let delta = sample.saturating_sub(seen);
                    if delta.is_zero() {
                        throttle.clear_warning(user.uid);
                    } else if let Some(user) =
                        throttle.observe(user, delta.upload, delta.download, now)
                    {
                        limited.push(user);
                    }
                }
            }
            if sample.is_zero() {
                continue;
            }
            traffic.push(UserTraffic {
                uid: user.uid,
                email: user.email.clone(),
                upload: sample.upload,
                download: sample.download,
            });
            samples.push((user_tag, sample));
        }
        self.throttle_seen
            .lock()
            .retain(|user_tag, _| peeked.contains(user_tag));

        if !limited.is_empty() {
            let uids: Vec<u32> = limited.iter().map(|u| u.uid).collect();
            info!(%tag, ?uids, "users exceeded the sustained rate, throttling");
            if let Err(e) = self.limiter.update_inbound(tag, &limited) {
                warn!(%tag, error = %e, "failed to apply throttle");
            }
        }

        self.report_traffic(&traffic, &samples).await;
        self.report_online(tag).await;
        self.report_detections(tag).await;
        self.report_status().await;

        let rejected = self.limiter.take_rejections(tag);
        if rejected > 0 {
            warn!(%tag, rejected, "connections rejected by device limit");
            metrics::record_device_rejections(tag, rejected);
        }
        let suspended = self
            .throttle
            .lock()
            .as_ref()
            .map_or(0, AutoThrottle::suspended_count);
        metrics::set_throttled_users(tag, suspended);
    }

    /// Put users whose suspension expired back on their panel speed limit.
    fn restore_expired(&self, now: Instant) {
        let released = match self.throttle.lock().as_mut() {
            Some(throttle) => throttle.release_expired(now),
            None => return,
        };
        if released.is_empty() {
            return;
        }
        // latest panel record, in case a reconcile changed the speed
        let Some(current) = self.snapshot() else {
            return;
        };
        let uids: HashSet<u32> = released.iter().map(|(uid, _)| *uid).collect();
        let restored: Vec<UserInfo> = current
            .users
            .iter()
            .filter(|u| uids.contains(&u.uid))
            .cloned()
            .collect();
        info!(tag = %current.tag, count = restored.len(), "speed limit suspensions expired");
        if restored.is_empty() {
            return;
        }
        if let Err(e) = self.limiter.update_inbound(&current.tag, &restored) {
            warn!(tag = %current.tag, error = %e, "failed to restore speed limits");
        }
    }

    /// Counters are reset only once the panel has accepted the report.
    async fn report_traffic(&self, traffic: &[UserTraffic], samples: &[(String, TrafficSample)]) {
        if traffic.is_empty() {
            return;
        }
        let bytes: u64 = samples.iter().map(|(_, s)| s.total()).sum();

        if !self.config.disable_upload_traffic {
            match self.panel.report_user_traffic(traffic).await {
                Ok(()) => {
                    metrics::record_traffic_report(bytes, true);
                    debug!(users = traffic.len(), bytes, "traffic reported");
                }
                Err(e) => {
                    metrics::record_traffic_report(bytes, false);
                    warn!(users = traffic.len(), error = %e, "traffic report failed, keeping counters");
                    return;
                }
            }
        }

        for (user_tag, sample) in samples {
            match self.engine.reset_traffic(user_tag, *sample).await {
                Ok(()) => self.forget_seen(user_tag, *sample),
                Err(e) => warn!(%user_tag, error = %e, "failed to reset traffic counters"),
            }
        }
    }

    /// Shift the throttle baseline down by what the engine just subtracted.
    fn forget_seen(&self, user_tag: &str, reset: TrafficSample) {
        let mut seen = self.throttle_seen.lock();
        if let Some(entry) = seen.get_mut(user_tag) {
            *entry = entry.saturating_sub(reset);
            if entry.is_zero() {
                seen.remove(user_tag);
            }
        }
    }

    async fn report_online(&self, tag: &str) {
        match self.limiter.drain_online_devices(tag) {
            Ok(online) if !online.is_empty() => {
                if let Err(e) = self.panel.report_online_users(&online).await {
                    warn!(%tag, error = %e, "failed to report online users");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(%tag, error = %e, "failed to drain online devices"),
        }
    }

    async fn report_detections(&self, tag: &str) {
        match self.rules.drain_detections(tag) {
            Ok(results) if !results.is_empty() => {
                info!(%tag, count = results.len(), "reporting audit detections");
                if let Err(e) = self.panel.report_illegal(&results).await {
                    warn!(%tag, error = %e, "failed to report detections");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(%tag, error = %e, "failed to drain detections"),
        }
    }

    async fn report_status(&self) {
        let probe = Arc::clone(&self.probe);
        let status = match tokio::task::spawn_blocking(move || probe.node_status()).await {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "node status probe failed");
                return;
            }
        };
        if let Err(e) = self.panel.report_node_status(&status).await {
            warn!(error = %e, "failed to report node status");
        }
    }

    async fn check_certificate(&self) {
        let Some(renewer) = &self.cert else {
            return;
        };
        let cert = &self.config.cert;
        if !cert.mode.is_managed() {
            return;
        }
        if !self.snapshot().is_some_and(|s| s.node.enable_tls) {
            return;
        }
        match renewer.renew_certificate(&cert.request()).await {
            Ok(paths) => debug!(domain = %cert.domain, cert_file = %paths.cert_file, "certificate checked"),
            Err(e) => warn!(domain = %cert.domain, error = %e, "certificate renewal failed, retrying next cycle"),
        }
    }

    async fn sync_global_devices(&self) {
        let Some(current) = self.snapshot() else {
            return;
        };
        match self.limiter.sync_global_devices(&current.tag).await {
            Ok(merged) => debug!(merged, "merged cluster-wide devices"),
            Err(e) => warn!(error = %e, "global device sync failed"),
        }
    }
}
