//! Concurrency Engine
//!
//! Turns "an entity has a pending envelope" into a handler invocation. The
//! backend is chosen once, at start-up:
//!
//! - [`DispatchBackend::Scheduled`]: scheduler and worker thread pools, one
//!   handler invocation at a time per entity, FIFO per mailbox
//! - [`DispatchBackend::Synchronous`]: direct call on the sender's thread
//!
//! Handlers that never return occupy their worker for good; nothing bounds
//! handler run time.

mod engine;
pub mod mailbox;
pub mod stats;
mod synchronous;

pub use mailbox::Mailbox;
pub use stats::{EngineStats, StatsSnapshot};

use crate::error::Result;
use crate::router::Router;
use config::{DispatchBackend, DispatchConfig};
use std::sync::Arc;
use types::Envelope;

/// Delivery backend behind the router
pub(crate) trait Dispatcher: Send + Sync {
    fn dispatch(&self, router: &Arc<Router>, mailbox: Arc<Mailbox>, envelope: Envelope);

    /// Stop and join engine threads; idempotent
    fn shutdown(&self);

    fn backend(&self) -> DispatchBackend;
}

pub(crate) fn build(config: &DispatchConfig, stats: Arc<EngineStats>) -> Result<Box<dyn Dispatcher>> {
    Ok(match config.backend {
        DispatchBackend::Scheduled => Box::new(engine::ScheduledEngine::start(config, stats)?),
        DispatchBackend::Synchronous => Box::new(synchronous::SynchronousDispatcher::new(stats)),
    })
}
