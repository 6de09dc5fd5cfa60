//! Entities and their Handler Context
//!
//! An [`Entity`] is anything the router can deliver to. Handlers take `&self`:
//! under the scheduled backend the engine guarantees one invocation at a time
//! per entity, but under the synchronous backend concurrent senders call in
//! directly, so entities keep mutable state behind their own locks.

use crate::error::{HandlerError, Result};
use crate::router::Router;
use std::sync::Arc;
use types::{Envelope, PlatformId, Value};
use uuid::Uuid;

/// Message handler registered under a name in the address directory
pub trait Entity: Send + Sync + 'static {
    /// Handle one envelope
    ///
    /// Errors and panics are caught by the dispatch engine, logged with the
    /// envelope and counted; they never reach other entities.
    fn on_message(&self, envelope: &Envelope, ctx: &Context<'_>) -> std::result::Result<(), HandlerError>;
}

impl<F> Entity for F
where
    F: Fn(&Envelope, &Context<'_>) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
{
    fn on_message(&self, envelope: &Envelope, ctx: &Context<'_>) -> std::result::Result<(), HandlerError> {
        self(envelope, ctx)
    }
}

/// Build an entity from a closure
///
/// Pins the closure signature so argument types need no annotations.
pub fn from_fn<F>(handler: F) -> F
where
    F: Fn(&Envelope, &Context<'_>) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
{
    handler
}

/// What a handler sees of the platform while it runs
pub struct Context<'a> {
    router: &'a Arc<Router>,
    name: &'a str,
}

impl<'a> Context<'a> {
    pub(crate) fn new(router: &'a Arc<Router>, name: &'a str) -> Self {
        Self { router, name }
    }

    /// Name the entity is registered under
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn platform_id(&self) -> PlatformId {
        self.router.platform_id()
    }

    /// Full router API (casts, subscriptions, notifications)
    pub fn router(&self) -> &Arc<Router> {
        self.router
    }

    /// Route an envelope
    pub fn send(&self, envelope: Envelope) -> Result<()> {
        self.router.send(envelope)
    }

    /// Answer `original`, continuing its conversation
    pub fn reply(&self, original: &Envelope, payload: impl Into<Value>) -> Result<()> {
        self.router.send(original.reply(self.name).with_payload(payload))
    }

    /// Fresh conversation identifier for a request/reply exchange
    pub fn new_conversation(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}
