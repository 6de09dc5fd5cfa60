//! Address Directory
//!
//! Local half of the directory: entity name → mailbox, capability type →
//! ordered subscribers, event type → subscribers and role instance → owner.
//! The remote half (name → nodes) lives in the network layer's
//! `RemoteDirectory`, filled only by propagation.
//!
//! Read-mostly: lookups take shared locks or lock-free map reads, writes come
//! from (de)registration and subscription calls only.

use crate::dispatch::Mailbox;
use crate::entity::Entity;
use crate::error::RegistrationError;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;
use types::{PLATFORM_SEPARATOR, SYSTEM_PREFIX};
use uuid::Uuid;

type Result<T> = std::result::Result<T, RegistrationError>;

/// Installed role: behavior class plus the entity it is attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRecord {
    pub class: String,
    pub owner: String,
}

#[derive(Debug, Default)]
pub struct AddressDirectory {
    mailboxes: DashMap<String, Arc<Mailbox>>,
    /// First subscriber wins unicast resolution
    capabilities: RwLock<HashMap<String, Vec<String>>>,
    events: RwLock<HashMap<String, BTreeSet<String>>>,
    roles: RwLock<HashMap<String, RoleRecord>>,
}

impl AddressDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an application entity
    ///
    /// Names must be non-empty, free of whitespace and `@`, and must not use
    /// the `$` prefix reserved for platform entities.
    pub(crate) fn register(&self, name: &str, entity: Arc<dyn Entity>) -> Result<Arc<Mailbox>> {
        validate_name(name)?;
        if name.starts_with(SYSTEM_PREFIX) {
            return Err(RegistrationError::ReservedName { name: name.to_string() });
        }
        self.insert(name, entity)
    }

    /// Register a platform entity under a `$` name
    pub(crate) fn register_system(&self, name: &str, entity: Arc<dyn Entity>) -> Result<Arc<Mailbox>> {
        validate_name(name)?;
        self.insert(name, entity)
    }

    fn insert(&self, name: &str, entity: Arc<dyn Entity>) -> Result<Arc<Mailbox>> {
        use dashmap::mapref::entry::Entry;

        match self.mailboxes.entry(name.to_string()) {
            Entry::Occupied(_) => Err(RegistrationError::DuplicateName { name: name.to_string() }),
            Entry::Vacant(slot) => {
                let mailbox = Arc::new(Mailbox::new(name, entity));
                slot.insert(mailbox.clone());
                debug!(entity = name, "Entity registered");
                Ok(mailbox)
            }
        }
    }

    /// Remove an entity with all its subscriptions and roles
    ///
    /// Returns the closed mailbox; anything still queued in it was dropped.
    pub(crate) fn deregister(&self, name: &str) -> Result<(Arc<Mailbox>, usize)> {
        let (_, mailbox) = self
            .mailboxes
            .remove(name)
            .ok_or_else(|| RegistrationError::UnknownEntity { name: name.to_string() })?;

        self.capabilities.write().retain(|_, subscribers| {
            subscribers.retain(|s| s != name);
            !subscribers.is_empty()
        });
        self.events.write().retain(|_, subscribers| {
            subscribers.remove(name);
            !subscribers.is_empty()
        });
        self.roles.write().retain(|_, role| role.owner != name);

        let dropped = mailbox.close();
        debug!(entity = name, dropped, "Entity deregistered");
        Ok((mailbox, dropped))
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Arc<Mailbox>> {
        self.mailboxes.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.mailboxes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.mailboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mailboxes.is_empty()
    }

    /// Every registered name, sorted, system entities included
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.mailboxes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Registered application entities, sorted
    pub fn application_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .mailboxes
            .iter()
            .map(|e| e.key().clone())
            .filter(|n| !n.starts_with(SYSTEM_PREFIX))
            .collect();
        names.sort();
        names
    }

    /// Close every mailbox and empty the directory; returns dropped envelopes
    pub(crate) fn clear(&self) -> usize {
        let mut dropped = 0;
        for entry in self.mailboxes.iter() {
            dropped += entry.value().close();
        }
        self.mailboxes.clear();
        self.capabilities.write().clear();
        self.events.write().clear();
        self.roles.write().clear();
        dropped
    }

    // ---- capabilities ----

    /// Append `name` to the subscribers of `capability`; false when already there
    pub(crate) fn subscribe_capability(&self, name: &str, capability: &str) -> Result<bool> {
        self.require(name)?;
        let mut capabilities = self.capabilities.write();
        let subscribers = capabilities.entry(capability.to_string()).or_default();
        if subscribers.iter().any(|s| s == name) {
            return Ok(false);
        }
        subscribers.push(name.to_string());
        Ok(true)
    }

    pub(crate) fn unsubscribe_capability(&self, name: &str, capability: &str) -> bool {
        let mut capabilities = self.capabilities.write();
        let Some(subscribers) = capabilities.get_mut(capability) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|s| s != name);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            capabilities.remove(capability);
        }
        removed
    }

    /// Earliest registered subscriber
    pub fn capability_handler(&self, capability: &str) -> Option<String> {
        self.capabilities
            .read()
            .get(capability)
            .and_then(|subscribers| subscribers.first().cloned())
    }

    pub fn capability_subscribers(&self, capability: &str) -> Vec<String> {
        self.capabilities.read().get(capability).cloned().unwrap_or_default()
    }

    // ---- events ----

    pub(crate) fn subscribe_event(&self, name: &str, event: &str) -> Result<bool> {
        self.require(name)?;
        Ok(self
            .events
            .write()
            .entry(event.to_string())
            .or_default()
            .insert(name.to_string()))
    }

    pub(crate) fn unsubscribe_event(&self, name: &str, event: &str) -> bool {
        let mut events = self.events.write();
        let Some(subscribers) = events.get_mut(event) else {
            return false;
        };
        let removed = subscribers.remove(name);
        if subscribers.is_empty() {
            events.remove(event);
        }
        removed
    }

    /// Subscribers of `event`, sorted
    pub fn event_subscribers(&self, event: &str) -> Vec<String> {
        self.events
            .read()
            .get(event)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    // ---- roles ----

    /// Attach a role of `class` to `owner`; returns the role instance id
    pub(crate) fn attach_role(&self, owner: &str, class: &str) -> Result<String> {
        self.require(owner)?;
        let instance = format!("{}#{}", class, Uuid::new_v4().simple());
        self.roles.write().insert(
            instance.clone(),
            RoleRecord {
                class: class.to_string(),
                owner: owner.to_string(),
            },
        );
        Ok(instance)
    }

    pub(crate) fn detach_role(&self, instance: &str) -> Option<RoleRecord> {
        self.roles.write().remove(instance)
    }

    pub fn role(&self, instance: &str) -> Option<RoleRecord> {
        self.roles.read().get(instance).cloned()
    }

    /// Entities with at least one role of `class`, sorted
    pub fn role_players(&self, class: &str) -> Vec<String> {
        let players: BTreeSet<String> = self
            .roles
            .read()
            .values()
            .filter(|r| r.class == class)
            .map(|r| r.owner.clone())
            .collect();
        players.into_iter().collect()
    }

    fn require(&self, name: &str) -> Result<()> {
        if self.contains(name) {
            Ok(())
        } else {
            Err(RegistrationError::UnknownEntity { name: name.to_string() })
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason| {
        Err(RegistrationError::InvalidName {
            name: name.to_string(),
            reason,
        })
    };
    if name.is_empty() {
        return invalid("empty");
    }
    if name.contains(PLATFORM_SEPARATOR) {
        return invalid("contains the platform separator '@'");
    }
    if name.chars().any(char::is_whitespace) {
        return invalid("contains whitespace");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{from_fn, Context};
    use crate::error::HandlerError;
    use types::Envelope;

    fn noop() -> Arc<dyn Entity> {
        Arc::new(from_fn(|_: &Envelope, _: &Context<'_>| Ok::<(), HandlerError>(())))
    }

    fn directory(names: &[&str]) -> AddressDirectory {
        let dir = AddressDirectory::new();
        for name in names {
            dir.register(name, noop()).unwrap();
        }
        dir
    }

    #[test]
    fn test_duplicate_and_invalid_names() {
        let dir = directory(&["alice"]);

        assert!(matches!(
            dir.register("alice", noop()),
            Err(RegistrationError::DuplicateName { .. })
        ));
        assert!(matches!(
            dir.register("$generic", noop()),
            Err(RegistrationError::ReservedName { .. })
        ));
        assert!(matches!(dir.register("", noop()), Err(RegistrationError::InvalidName { .. })));
        assert!(matches!(
            dir.register("bob@lab", noop()),
            Err(RegistrationError::InvalidName { .. })
        ));
        assert!(dir.register_system("$generic", noop()).is_ok());
        assert_eq!(dir.application_names(), vec!["alice".to_string()]);
        assert_eq!(dir.names(), vec!["$generic".to_string(), "alice".to_string()]);
    }

    #[test]
    fn test_first_capability_subscriber_wins() {
        let dir = directory(&["alice", "bob"]);
        assert!(dir.subscribe_capability("bob", "translate").unwrap());
        assert!(dir.subscribe_capability("alice", "translate").unwrap());
        assert!(!dir.subscribe_capability("bob", "translate").unwrap());

        assert_eq!(dir.capability_handler("translate").as_deref(), Some("bob"));
        assert!(dir.unsubscribe_capability("bob", "translate"));
        assert_eq!(dir.capability_handler("translate").as_deref(), Some("alice"));
        assert!(dir.capability_handler("unknown").is_none());
    }

    #[test]
    fn test_subscription_requires_registration() {
        let dir = directory(&[]);
        assert!(matches!(
            dir.subscribe_event("ghost", "tick"),
            Err(RegistrationError::UnknownEntity { .. })
        ));
    }

    #[test]
    fn test_deregister_cleans_everything() {
        let dir = directory(&["alice", "bob"]);
        dir.subscribe_capability("alice", "translate").unwrap();
        dir.subscribe_event("alice", "tick").unwrap();
        dir.subscribe_event("bob", "tick").unwrap();
        let instance = dir.attach_role("alice", "seller").unwrap();

        let (mailbox, dropped) = dir.deregister("alice").unwrap();
        assert!(mailbox.is_closed());
        assert_eq!(dropped, 0);

        assert!(!dir.contains("alice"));
        assert!(dir.capability_handler("translate").is_none());
        assert_eq!(dir.event_subscribers("tick"), vec!["bob".to_string()]);
        assert!(dir.role(&instance).is_none());
        assert!(matches!(
            dir.deregister("alice"),
            Err(RegistrationError::UnknownEntity { .. })
        ));
    }

    #[test]
    fn test_role_players_by_class() {
        let dir = directory(&["alice", "bob", "carol"]);
        let first = dir.attach_role("alice", "seller").unwrap();
        dir.attach_role("alice", "seller").unwrap();
        dir.attach_role("bob", "buyer").unwrap();
        dir.attach_role("carol", "seller").unwrap();

        assert_eq!(dir.role_players("seller"), vec!["alice".to_string(), "carol".to_string()]);
        assert_eq!(dir.role(&first).map(|r| r.owner), Some("alice".to_string()));

        dir.detach_role(&first);
        // The second seller role keeps alice in the class
        assert_eq!(dir.role_players("seller").len(), 2);
    }
}
