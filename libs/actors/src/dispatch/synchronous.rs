//! Synchronous Backend
//!
//! Delivery is a direct call into the recipient on the sender's thread. There
//! is no queue and no single-flight guarantee: concurrent senders may run the
//! same handler at the same time, so entities protect their own state.

use super::mailbox::Mailbox;
use super::stats::EngineStats;
use super::Dispatcher;
use crate::router::Router;
use config::DispatchBackend;
use std::sync::Arc;
use tracing::debug;
use types::Envelope;

pub(crate) struct SynchronousDispatcher {
    stats: Arc<EngineStats>,
}

impl SynchronousDispatcher {
    pub(crate) fn new(stats: Arc<EngineStats>) -> Self {
        debug!("Synchronous dispatch selected");
        Self { stats }
    }
}

impl Dispatcher for SynchronousDispatcher {
    fn dispatch(&self, router: &Arc<Router>, mailbox: Arc<Mailbox>, envelope: Envelope) {
        if mailbox.is_closed() {
            self.stats.record_dropped(1);
            debug!(entity = %mailbox.name(), "Mailbox closed, envelope dropped");
            return;
        }
        mailbox.invoke(router, &envelope, &self.stats);
    }

    fn shutdown(&self) {}

    fn backend(&self) -> DispatchBackend {
        DispatchBackend::Synchronous
    }
}
