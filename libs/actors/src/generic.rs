//! Generic Capability Handler
//!
//! Capabilities flagged `generic` skip subscriber lookup and go to the
//! platform entity `$generic`, which runs the [`GenericAction`] registered
//! under the capability type and replies with its result.

use crate::entity::{Context, Entity};
use crate::error::HandlerError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use types::{Envelope, Notification, NotificationCode, NotificationKind, Value, GENERIC_HANDLER_NAME};

/// Executable body of a generic capability
pub trait GenericAction: Send + Sync + 'static {
    fn execute(&self, payload: &Value) -> Result<Value, HandlerError>;
}

impl<F> GenericAction for F
where
    F: Fn(&Value) -> Result<Value, HandlerError> + Send + Sync + 'static,
{
    fn execute(&self, payload: &Value) -> Result<Value, HandlerError> {
        self(payload)
    }
}

/// Capability type → action
#[derive(Default)]
pub struct GenericActions {
    actions: RwLock<HashMap<String, Arc<dyn GenericAction>>>,
}

impl GenericActions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install an action; returns true when it replaced an earlier one
    pub fn register(&self, kind: impl Into<String>, action: Arc<dyn GenericAction>) -> bool {
        self.actions.write().insert(kind.into(), action).is_some()
    }

    pub fn remove(&self, kind: &str) -> bool {
        self.actions.write().remove(kind).is_some()
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn GenericAction>> {
        self.actions.read().get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.actions.read().keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

/// The `$generic` entity
pub(crate) struct GenericHandler;

impl Entity for GenericHandler {
    fn on_message(&self, envelope: &Envelope, ctx: &Context<'_>) -> Result<(), HandlerError> {
        let router = ctx.router();
        let Some(intent) = envelope.intent.as_ref() else {
            router.notify(
                envelope,
                NotificationKind::Failure,
                Notification::new(NotificationCode::InvalidGenericCapability, "envelope carries no capability"),
            );
            return Ok(());
        };

        let Some(action) = router.generic_actions().get(&intent.kind) else {
            router.notify(
                envelope,
                NotificationKind::Failure,
                Notification::new(NotificationCode::InvalidGenericCapability, intent.kind.clone()),
            );
            return Ok(());
        };

        match action.execute(&intent.payload) {
            Ok(result) => {
                debug!(capability = %intent.kind, sender = %envelope.sender, "Generic capability executed");
                ctx.send(envelope.reply(GENERIC_HANDLER_NAME).with_payload(result))?;
            }
            Err(e) => router.notify(
                envelope,
                NotificationKind::Failure,
                Notification::new(
                    NotificationCode::GenericCapabilityExecutionFailed,
                    format!("{}: {}", intent.kind, e),
                ),
            ),
        }
        Ok(())
    }
}
