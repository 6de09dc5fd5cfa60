//! Platform
//!
//! One runtime instance: a [`Router`] plus, in distributed mode, its
//! [`NetworkLayer`]. Several platforms can live in one process; nothing is
//! global. Dropping a platform shuts it down.

use crate::cast::{CandidateFilter, Scope};
use crate::dispatch::StatsSnapshot;
use crate::entity::Entity;
use crate::error::{Result, RouterError};
use crate::generic::GenericAction;
use crate::router::{GroupMembership, Router};
use config::RuntimeConfig;
use network::{InboundHandler, NetworkLayer, NodeSummary};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::info;
use types::{Envelope, NodeAddress, Notification, NotificationKind, PlatformId};

pub struct Platform {
    router: Arc<Router>,
    config: RuntimeConfig,
}

impl Platform {
    /// Validate `config`, start the dispatch backend and, when distributed,
    /// the network layer
    pub fn start(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        let platform_id = PlatformId::generate();
        let router = Router::new(&config.dispatch, platform_id)?;

        if config.network.distributed {
            let weak: Weak<Router> = Arc::downgrade(&router);
            let handler: Weak<dyn InboundHandler> = weak;
            match NetworkLayer::start(&config, platform_id, handler) {
                Ok(layer) => router.attach_network(layer),
                Err(e) => {
                    router.shutdown();
                    return Err(e.into());
                }
            }
        }

        info!(
            platform_id = %platform_id,
            backend = ?router.backend(),
            distributed = config.network.distributed,
            node = ?router.network().map(|n| n.local_node()),
            "Platform started"
        );
        Ok(Self { router, config })
    }

    /// Local, scheduled-backend platform with default settings
    pub fn local() -> Result<Self> {
        Self::start(RuntimeConfig::default())
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn platform_id(&self) -> PlatformId {
        self.router.platform_id()
    }

    /// TCP listener address, when distributed
    pub fn local_node(&self) -> Option<NodeAddress> {
        self.router.network().map(|n| n.local_node())
    }

    pub fn is_running(&self) -> bool {
        self.router.is_running()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.router.stats()
    }

    // ---- directory ----

    pub fn register(&self, name: &str, entity: impl Entity) -> Result<()> {
        self.router.register(name, entity)
    }

    pub fn register_shared(&self, name: &str, entity: Arc<dyn Entity>) -> Result<()> {
        self.router.register_shared(name, entity)
    }

    pub fn deregister(&self, name: &str) -> Result<()> {
        self.router.deregister(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.router.directory().contains(name)
    }

    /// Registered application entities, sorted
    pub fn names(&self) -> Vec<String> {
        self.router.directory().application_names()
    }

    pub fn subscribe_capability(&self, name: &str, capability: &str) -> Result<bool> {
        self.router.subscribe_capability(name, capability)
    }

    pub fn unsubscribe_capability(&self, name: &str, capability: &str) -> bool {
        self.router.unsubscribe_capability(name, capability)
    }

    pub fn subscribe_event(&self, name: &str, event: &str) -> Result<bool> {
        self.router.subscribe_event(name, event)
    }

    pub fn unsubscribe_event(&self, name: &str, event: &str) -> bool {
        self.router.unsubscribe_event(name, event)
    }

    pub fn attach_role(&self, owner: &str, class: &str) -> Result<String> {
        self.router.attach_role(owner, class)
    }

    pub fn detach_role(&self, instance: &str) -> bool {
        self.router.detach_role(instance)
    }

    pub fn register_generic_action(&self, kind: impl Into<String>, action: impl GenericAction) -> bool {
        self.router.register_generic_action(kind, action)
    }

    pub fn set_group_membership(&self, provider: Arc<dyn GroupMembership>) {
        self.router.set_group_membership(provider)
    }

    // ---- sending ----

    pub fn send(&self, envelope: Envelope) -> Result<()> {
        self.router.send(envelope)
    }

    pub fn send_broadcast(&self, envelope: Envelope, scope: Scope) -> Result<Vec<String>> {
        self.router.send_broadcast(envelope, scope)
    }

    pub fn send_rolecast(&self, envelope: Envelope, class: &str, scope: Scope) -> Result<Vec<String>> {
        self.router.send_rolecast(envelope, class, scope)
    }

    pub fn send_groupcast(&self, envelope: Envelope, group: &str) -> Result<Vec<String>> {
        self.router.send_groupcast(envelope, group)
    }

    pub fn send_randomcast(
        &self,
        envelope: Envelope,
        n: usize,
        scope: Scope,
        filter: &CandidateFilter,
    ) -> Result<Vec<String>> {
        self.router.send_randomcast(envelope, n, scope, filter)
    }

    pub fn send_fuzzycast(
        &self,
        envelope: Envelope,
        quota: f64,
        scope: Scope,
        filter: &CandidateFilter,
    ) -> Result<Vec<String>> {
        self.router.send_fuzzycast(envelope, quota, scope, filter)
    }

    pub fn notify(&self, original: &Envelope, kind: NotificationKind, notification: Notification) {
        self.router.notify(original, kind, notification)
    }

    // ---- network ----

    fn network(&self) -> Result<&NetworkLayer> {
        self.router.network().ok_or(RouterError::NotDistributed)
    }

    /// Run the propagation handshake with `host:port`, blocking until both
    /// directories are exchanged or `timeout` elapses
    pub fn initiate_with(&self, host: &str, port: u16, timeout: Duration) -> Result<NodeAddress> {
        Ok(self.network()?.initiate_with(host, port, timeout)?)
    }

    /// [`Platform::initiate_with`], then register `alias` for the peer
    pub fn connect(&self, host: &str, port: u16, alias: Option<&str>, timeout: Duration) -> Result<NodeAddress> {
        Ok(self.network()?.connect(host, port, alias, timeout)?)
    }

    pub fn set_alias(&self, alias: &str, node: NodeAddress) -> Result<bool> {
        Ok(self.network()?.set_alias(alias, node))
    }

    pub fn remove_alias(&self, alias: &str) -> Result<Option<NodeAddress>> {
        Ok(self.network()?.remove_alias(alias))
    }

    pub fn disconnect(&self, node: NodeAddress) -> Result<()> {
        self.network()?.disconnect(node);
        Ok(())
    }

    /// Connected peers; empty when not distributed
    pub fn remote_snapshot(&self) -> Vec<NodeSummary> {
        self.router.network().map(|n| n.snapshot()).unwrap_or_default()
    }

    /// Entity names known on connected peers; empty when not distributed
    pub fn remote_names(&self) -> Vec<String> {
        self.router.network().map(|n| n.remote_names()).unwrap_or_default()
    }

    /// Notify peers, stop the engine and drop queued envelopes; idempotent
    pub fn shutdown(&self) {
        self.router.shutdown();
    }
}

impl Drop for Platform {
    fn drop(&mut self) {
        self.shutdown();
    }
}
