//! Router
//!
//! The runtime state object of one platform: address directory, dispatch
//! backend, optional network layer and generic actions. Resolves every
//! outbound envelope to local mailboxes or remote nodes.
//!
//! ## Resolution order for [`Router::send`]
//!
//! 1. No recipient, capability present: generic flag → `$generic`; else the
//!    first local subscriber; else forward to peers for remote resolution
//!    (informing the sender) when networked, connected and not network-borne;
//!    else *capability-handler-not-found-local*.
//! 2. No recipient, event present: every local subscriber (none is fine);
//!    propagated events are also broadcast once by the originating platform.
//! 3. Recipient: local mailbox first; then the reply node or a node known to
//!    host the name; `name@platform` goes to that platform; otherwise a
//!    not-found notification.
//!
//! Resolution failures never surface as `Err`: the sender receives a typed
//! notification envelope instead (see [`Router::notify`]).

use crate::cast::{self, CandidateFilter, Scope, Selection};
use crate::directory::AddressDirectory;
use crate::dispatch::{self, Dispatcher, EngineStats, StatsSnapshot};
use crate::entity::Entity;
use crate::error::{RegistrationError, Result, RouterError};
use crate::generic::{GenericAction, GenericActions, GenericHandler};
use config::{DispatchBackend, DispatchConfig};
use network::{DeliveryMode, InboundHandler, NetworkLayer};
use parking_lot::RwLock;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, info, trace, warn};
use types::{
    EntityAddress, Envelope, NodeAddress, Notification, NotificationCode, NotificationKind, PlatformId,
    PlatformRef, GENERIC_HANDLER_NAME,
};

/// Membership groups, supplied by the application
pub trait GroupMembership: Send + Sync + 'static {
    /// Direct members of `group`
    fn members(&self, group: &str) -> Vec<String>;
}

pub struct Router {
    me: Weak<Router>,
    platform_id: PlatformId,
    directory: AddressDirectory,
    dispatcher: Box<dyn Dispatcher>,
    network: OnceLock<NetworkLayer>,
    generic: GenericActions,
    groups: RwLock<Option<Arc<dyn GroupMembership>>>,
    stats: Arc<EngineStats>,
    running: AtomicBool,
}

impl Router {
    /// Build a router and start its dispatch backend
    pub fn new(config: &DispatchConfig, platform_id: PlatformId) -> Result<Arc<Self>> {
        let stats = Arc::new(EngineStats::default());
        let dispatcher = dispatch::build(config, stats.clone())?;

        Ok(Arc::new_cyclic(|me| Self {
            me: me.clone(),
            platform_id,
            directory: AddressDirectory::new(),
            dispatcher,
            network: OnceLock::new(),
            generic: GenericActions::new(),
            groups: RwLock::new(None),
            stats,
            running: AtomicBool::new(true),
        }))
    }

    pub(crate) fn attach_network(&self, layer: NetworkLayer) {
        if let Err(layer) = self.network.set(layer) {
            warn!(node = %layer.local_node(), "Network layer already attached");
            layer.shutdown();
        }
    }

    pub fn platform_id(&self) -> PlatformId {
        self.platform_id
    }

    pub fn directory(&self) -> &AddressDirectory {
        &self.directory
    }

    pub fn network(&self) -> Option<&NetworkLayer> {
        self.network.get()
    }

    pub fn backend(&self) -> DispatchBackend {
        self.dispatcher.backend()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn generic_actions(&self) -> &GenericActions {
        &self.generic
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(RouterError::NotRunning)
        }
    }

    // ---- registration ----

    pub fn register(&self, name: &str, entity: impl Entity) -> Result<()> {
        self.register_shared(name, Arc::new(entity))
    }

    pub fn register_shared(&self, name: &str, entity: Arc<dyn Entity>) -> Result<()> {
        self.ensure_running()?;
        self.directory.register(name, entity)?;
        if let Some(network) = self.network() {
            network.propagate_addition(name);
        }
        info!(entity = name, "Entity registered");
        Ok(())
    }

    /// Remove an entity; envelopes still queued for it are dropped
    pub fn deregister(&self, name: &str) -> Result<()> {
        let (_, dropped) = self.directory.deregister(name)?;
        self.stats.record_dropped(dropped as u64);
        if let Some(network) = self.network() {
            network.propagate_removal(name);
        }
        info!(entity = name, dropped, "Entity deregistered");
        Ok(())
    }

    pub fn subscribe_capability(&self, name: &str, capability: &str) -> Result<bool> {
        Ok(self.directory.subscribe_capability(name, capability)?)
    }

    pub fn unsubscribe_capability(&self, name: &str, capability: &str) -> bool {
        self.directory.unsubscribe_capability(name, capability)
    }

    pub fn subscribe_event(&self, name: &str, event: &str) -> Result<bool> {
        Ok(self.directory.subscribe_event(name, event)?)
    }

    pub fn unsubscribe_event(&self, name: &str, event: &str) -> bool {
        self.directory.unsubscribe_event(name, event)
    }

    /// Attach a role of `class` to `owner`; returns the role instance id
    pub fn attach_role(&self, owner: &str, class: &str) -> Result<String> {
        Ok(self.directory.attach_role(owner, class)?)
    }

    pub fn detach_role(&self, instance: &str) -> bool {
        self.directory.detach_role(instance).is_some()
    }

    pub fn register_generic_action(&self, kind: impl Into<String>, action: impl GenericAction) -> bool {
        self.generic.register(kind, Arc::new(action))
    }

    pub fn set_group_membership(&self, provider: Arc<dyn GroupMembership>) {
        *self.groups.write() = Some(provider);
    }

    // ---- sending ----

    /// Route one envelope
    pub fn send(&self, envelope: Envelope) -> Result<()> {
        self.ensure_running()?;
        if envelope.recipient.is_none() && envelope.intent.is_none() && envelope.event.is_none() {
            return Err(RouterError::MissingRecipient);
        }
        self.route(envelope);
        Ok(())
    }

    /// Every entity except the sender; `Global` also reaches every peer
    ///
    /// Returns the local recipients.
    pub fn send_broadcast(&self, envelope: Envelope, scope: Scope) -> Result<Vec<String>> {
        self.ensure_running()?;
        let names: Vec<String> = self
            .directory
            .application_names()
            .into_iter()
            .filter(|n| *n != envelope.sender)
            .collect();
        let delivered = self.fan_out(&envelope, names);

        if scope == Scope::Global {
            if let Some(network) = self.network() {
                let peers = network.broadcast(DeliveryMode::Broadcast, envelope);
                debug!(peers = peers.len(), "Broadcast sent to peers");
            }
        }
        Ok(delivered)
    }

    /// Every entity playing a role of `class`, except the sender
    pub fn send_rolecast(&self, envelope: Envelope, class: &str, scope: Scope) -> Result<Vec<String>> {
        self.ensure_running()?;
        let players: Vec<String> = self
            .directory
            .role_players(class)
            .into_iter()
            .filter(|n| *n != envelope.sender)
            .collect();
        let delivered = self.fan_out(&envelope, players);

        if scope == Scope::Global {
            if let Some(network) = self.network() {
                let mode = DeliveryMode::Rolecast { role: class.to_string() };
                let peers = network.broadcast(mode, envelope);
                debug!(role = class, peers = peers.len(), "Rolecast sent to peers");
            }
        }
        Ok(delivered)
    }

    /// Every direct member of `group`, except the sender
    pub fn send_groupcast(&self, envelope: Envelope, group: &str) -> Result<Vec<String>> {
        self.ensure_running()?;
        if envelope.sender.is_empty() {
            return Err(RouterError::MissingSender);
        }
        let provider = self.groups.read().clone();
        let Some(provider) = provider else {
            debug!(group, "No group membership provider, groupcast reaches nobody");
            return Ok(Vec::new());
        };

        let members: Vec<String> = provider
            .members(group)
            .into_iter()
            .filter(|m| *m != envelope.sender)
            .collect();
        for member in &members {
            self.route_named(envelope.readdressed(member.as_str()), member);
        }
        Ok(members)
    }

    /// `n` distinct recipients drawn at random from the candidate pool
    pub fn send_randomcast(
        &self,
        envelope: Envelope,
        n: usize,
        scope: Scope,
        filter: &CandidateFilter,
    ) -> Result<Vec<String>> {
        self.ensure_running()?;
        let pool = self.candidates(&envelope.sender, scope, filter);

        match cast::pick(pool, n, &mut rand::thread_rng()) {
            selection @ Selection::Insufficient { .. } => {
                if let Some(notification) = selection.into_notification() {
                    self.notify(&envelope, NotificationKind::Failure, notification);
                }
                Ok(Vec::new())
            }
            Selection::Chosen(names) => {
                self.deliver_each(&envelope, &names);
                Ok(names)
            }
        }
    }

    /// `round(pool × quota)` recipients drawn at random from the candidate pool
    pub fn send_fuzzycast(
        &self,
        envelope: Envelope,
        quota: f64,
        scope: Scope,
        filter: &CandidateFilter,
    ) -> Result<Vec<String>> {
        self.ensure_running()?;
        let pool = self.candidates(&envelope.sender, scope, filter);

        let Some(count) = cast::fuzzy_count(pool.len(), quota) else {
            self.notify(&envelope, NotificationKind::Failure, Notification::invalid_quota(quota));
            return Ok(Vec::new());
        };
        if count == 0 {
            return Ok(Vec::new());
        }

        match cast::pick(pool, count, &mut rand::thread_rng()) {
            Selection::Insufficient { .. } => Ok(Vec::new()),
            Selection::Chosen(names) => {
                self.deliver_each(&envelope, &names);
                Ok(names)
            }
        }
    }

    fn candidates(&self, sender: &str, scope: Scope, filter: &CandidateFilter) -> Vec<String> {
        let local = self.directory.application_names();
        let remote = match (scope, self.network()) {
            (Scope::Global, Some(network)) => network.remote_names(),
            _ => Vec::new(),
        };
        cast::candidate_pool(&local, &remote, sender, filter)
    }

    fn deliver_each(&self, envelope: &Envelope, names: &[String]) {
        for name in names {
            self.route_named(envelope.readdressed(name.as_str()), name);
        }
    }

    /// Deliver clones to local entities; returns those that exist
    fn fan_out(&self, envelope: &Envelope, names: Vec<String>) -> Vec<String> {
        names
            .into_iter()
            .filter(|name| self.try_deliver_local(name, envelope.readdressed(name.as_str())).is_ok())
            .collect()
    }

    // ---- resolution ----

    pub(crate) fn route(&self, envelope: Envelope) {
        if let Some(recipient) = envelope.recipient.clone() {
            self.route_named(envelope, &recipient);
        } else if envelope.intent.is_some() {
            self.route_capability(envelope);
        } else if envelope.event.is_some() {
            self.route_event(envelope);
        } else {
            debug!(sender = %envelope.sender, "Envelope without recipient, intent or event dropped");
        }
    }

    fn route_capability(&self, envelope: Envelope) {
        let Some(intent) = envelope.intent.as_ref() else {
            return;
        };
        let kind = intent.kind.clone();

        if intent.generic {
            self.ensure_generic_handler();
            let readdressed = envelope.readdressed(GENERIC_HANDLER_NAME);
            if let Err(envelope) = self.try_deliver_local(GENERIC_HANDLER_NAME, readdressed) {
                warn!(capability = %kind, "Generic handler unavailable");
                self.notify(
                    &envelope,
                    NotificationKind::Failure,
                    Notification::new(NotificationCode::InvalidGenericCapability, kind),
                );
            }
            return;
        }

        if let Some(handler) = self.directory.capability_handler(&kind) {
            trace!(capability = %kind, handler = %handler, "Capability resolved locally");
            if let Err(envelope) = self.deliver_capability(&kind, handler, envelope) {
                self.notify(
                    &envelope,
                    NotificationKind::Failure,
                    Notification::new(NotificationCode::CapabilityHandlerNotFoundLocal, kind),
                );
            }
            return;
        }

        let forwardable = !envelope.is_from_network() && !envelope.remote_resolution;
        if let Some(network) = self.network().filter(|n| forwardable && n.connected_count() > 0) {
            let mut request = envelope.clone();
            request.remote_resolution = true;
            let peers = network.broadcast(DeliveryMode::ResolveCapability, request);
            if !peers.is_empty() {
                self.notify(
                    &envelope,
                    NotificationKind::Information,
                    Notification::new(
                        NotificationCode::CapabilityForwardedToPeers,
                        format!("{} forwarded to {} platform(s)", kind, peers.len()),
                    ),
                );
                return;
            }
        }

        self.notify(
            &envelope,
            NotificationKind::Failure,
            Notification::new(NotificationCode::CapabilityHandlerNotFoundLocal, kind),
        );
    }

    fn route_event(&self, envelope: Envelope) {
        let Some(event) = envelope.event.as_ref() else {
            return;
        };
        let subscribers = self.directory.event_subscribers(&event.kind);
        trace!(event = %event.kind, subscribers = subscribers.len(), "Event published");
        let propagate = event.propagate && !envelope.is_from_network();
        self.fan_out(&envelope, subscribers);

        if propagate {
            if let Some(network) = self.network() {
                network.broadcast(DeliveryMode::Event, envelope);
            }
        }
    }

    fn route_named(&self, envelope: Envelope, recipient: &str) {
        match EntityAddress::parse(recipient) {
            Ok(EntityAddress { name, platform: None }) => self.route_unicast(envelope, &name),
            Ok(EntityAddress {
                name,
                platform: Some(platform),
            }) => self.route_to_platform(envelope, &name, &platform),
            Err(e) => self.notify(
                &envelope,
                NotificationKind::Failure,
                Notification::new(NotificationCode::RecipientNotFoundLocal, format!("{}: {}", recipient, e)),
            ),
        }
    }

    fn route_unicast(&self, envelope: Envelope, name: &str) {
        let envelope = match self.try_deliver_local(name, envelope) {
            Ok(()) => return,
            Err(envelope) => envelope,
        };

        let Some(network) = self.network() else {
            self.notify(
                &envelope,
                NotificationKind::Failure,
                Notification::new(NotificationCode::RecipientNotFoundLocal, name),
            );
            return;
        };
        if envelope.is_from_network() {
            self.notify(
                &envelope,
                NotificationKind::Failure,
                Notification::new(NotificationCode::RecipientNotFoundLocal, name),
            );
            return;
        }

        let local = network.local_node();
        let target = envelope
            .reply_node
            .filter(|node| *node != local)
            .or_else(|| network.nodes_for(name).first().copied());
        let Some(node) = target else {
            self.notify(
                &envelope,
                NotificationKind::Failure,
                Notification::new(NotificationCode::RecipientNotFoundAnywhere, name),
            );
            return;
        };

        trace!(entity = name, node = %node, "Forwarding to remote entity");
        if let Err(e) = network.forward(node, DeliveryMode::Unicast, envelope.clone()) {
            warn!(entity = name, node = %node, error = %e, "Forward failed");
            self.notify(
                &envelope,
                NotificationKind::Failure,
                Notification::new(NotificationCode::RecipientNotFoundAnywhere, name),
            );
        }
    }

    fn route_to_platform(&self, envelope: Envelope, name: &str, platform: &PlatformRef) {
        let unknown = |router: &Self, envelope: &Envelope| {
            router.notify(
                envelope,
                NotificationKind::Failure,
                Notification::new(NotificationCode::RemotePlatformUnknown, platform.to_string()),
            )
        };

        let Some(network) = self.network() else {
            unknown(self, &envelope);
            return;
        };

        if is_local_platform(network.local_node(), platform) {
            if let Err(envelope) = self.try_deliver_local(name, envelope.readdressed(name)) {
                self.notify(
                    &envelope,
                    NotificationKind::Failure,
                    Notification::new(NotificationCode::RecipientNotFoundLocal, name),
                );
            }
            return;
        }

        let Some(node) = network.resolve_platform(platform) else {
            unknown(self, &envelope);
            return;
        };
        if let Err(e) = network.forward(node, DeliveryMode::Unicast, envelope.readdressed(name)) {
            warn!(entity = name, node = %node, error = %e, "Forward failed");
            unknown(self, &envelope);
        }
    }

    /// Hand `envelope` to the mailbox of `name`, or give it back when absent
    /// Deliver to `handler`; if it was deregistered after being resolved, look
    /// the capability up once more and try its current first subscriber
    fn deliver_capability(
        &self,
        kind: &str,
        handler: String,
        envelope: Envelope,
    ) -> std::result::Result<(), Envelope> {
        let Err(envelope) = self.try_deliver_local(&handler, envelope.readdressed(handler.as_str())) else {
            return Ok(());
        };
        match self.directory.capability_handler(kind) {
            Some(next) if next != handler => {
                debug!(capability = kind, gone = %handler, handler = %next, "Capability handler replaced");
                self.try_deliver_local(&next, envelope.readdressed(next.as_str()))
            }
            _ => Err(envelope),
        }
    }

    fn try_deliver_local(&self, name: &str, envelope: Envelope) -> std::result::Result<(), Envelope> {
        let Some(mailbox) = self.directory.lookup(name) else {
            return Err(envelope);
        };
        let Some(me) = self.me.upgrade() else {
            debug!(entity = name, "Router dropped, envelope discarded");
            return Ok(());
        };
        self.dispatcher.dispatch(&me, mailbox, envelope);
        Ok(())
    }

    fn ensure_generic_handler(&self) {
        if self.directory.contains(GENERIC_HANDLER_NAME) {
            return;
        }
        match self.directory.register_system(GENERIC_HANDLER_NAME, Arc::new(GenericHandler)) {
            Ok(_) => info!(entity = GENERIC_HANDLER_NAME, "Generic handler created"),
            Err(RegistrationError::DuplicateName { .. }) => {}
            Err(e) => warn!(error = %e, "Failed to create generic handler"),
        }
    }

    // ---- teardown ----

    /// Stop the network layer, then the engine; drop whatever is still queued
    pub(crate) fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(network) = self.network() {
            network.shutdown();
        }
        self.dispatcher.shutdown();

        let dropped = self.directory.clear();
        self.stats.record_dropped(dropped as u64);
        info!(
            platform_id = %self.platform_id,
            dropped,
            "Router stopped"
        );
    }
}

impl InboundHandler for Router {
    fn deliver(&self, mode: DeliveryMode, envelope: Envelope, from: NodeAddress) {
        if !self.is_running() {
            debug!(node = %from, "Router stopped, inbound envelope dropped");
            return;
        }
        trace!(node = %from, mode = ?mode, sender = %envelope.sender, "Inbound envelope");

        match mode {
            DeliveryMode::Unicast => {
                let Some(name) = envelope.recipient.clone() else {
                    debug!(node = %from, "Inbound unicast without recipient dropped");
                    return;
                };
                if let Err(envelope) = self.try_deliver_local(&name, envelope) {
                    self.notify(
                        &envelope,
                        NotificationKind::Failure,
                        Notification::new(NotificationCode::RecipientNotFoundLocal, name),
                    );
                }
            }
            DeliveryMode::Broadcast => {
                let names: Vec<String> = self
                    .directory
                    .application_names()
                    .into_iter()
                    .filter(|n| *n != envelope.sender)
                    .collect();
                self.fan_out(&envelope, names);
            }
            DeliveryMode::Rolecast { role } => {
                let players: Vec<String> = self
                    .directory
                    .role_players(&role)
                    .into_iter()
                    .filter(|n| *n != envelope.sender)
                    .collect();
                self.fan_out(&envelope, players);
            }
            DeliveryMode::Event => self.route_event(envelope),
            DeliveryMode::ResolveCapability => self.resolve_for_peer(envelope, from),
        }
    }

    fn local_names(&self) -> Vec<String> {
        self.directory.application_names()
    }
}

impl Router {
    /// Capability request forwarded by a peer that had no handler itself
    fn resolve_for_peer(&self, envelope: Envelope, from: NodeAddress) {
        let Some(kind) = envelope.intent.as_ref().map(|i| i.kind.clone()) else {
            debug!(node = %from, "Forwarded capability request without intent dropped");
            return;
        };

        let Some(handler) = self.directory.capability_handler(&kind) else {
            self.notify(
                &envelope,
                NotificationKind::Failure,
                Notification::new(NotificationCode::CapabilityNotFoundOnRemotePlatform, kind),
            );
            return;
        };

        let notice = Notification::new(
            NotificationCode::CapabilityForwardingInformational,
            format!("{} handled by {} on {}", kind, handler, self.platform_id),
        );
        let readdressed = envelope.readdressed(handler.as_str());
        if self.try_deliver_local(&handler, readdressed).is_ok() {
            self.notify(&envelope, NotificationKind::Information, notice);
        } else {
            self.notify(
                &envelope,
                NotificationKind::Failure,
                Notification::new(NotificationCode::CapabilityNotFoundOnRemotePlatform, kind),
            );
        }
    }
}

/// Whether `platform` names this platform's own listener
fn is_local_platform(local: NodeAddress, platform: &PlatformRef) -> bool {
    if platform.port != Some(local.port) {
        return false;
    }
    match platform.host.parse::<IpAddr>() {
        Ok(ip) => ip == local.ip || ip.is_loopback(),
        Err(_) => platform.host == "localhost",
    }
}
