//! Per-Entity Mailbox
//!
//! An unbounded FIFO of pending envelopes plus the entity it feeds. Under the
//! scheduled backend the mailbox moves through three states:
//!
//! ```text
//!   Idle ──push──► Scheduled ──worker enters──► InService
//!    ▲                 ▲                            │
//!    │                 └──── residual work ─────────┤
//!    └──────────────── queue empty ─────────────────┘
//! ```
//!
//! Exactly one party wins the `Idle → Scheduled` transition (a producer or the
//! worker that just finished), so a mailbox is never queued twice and never
//! serviced by two workers at once.

use super::stats::EngineStats;
use crate::entity::{Context, Entity};
use crate::router::Router;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, warn};
use types::Envelope;

const IDLE: u8 = 0;
const SCHEDULED: u8 = 1;
const IN_SERVICE: u8 = 2;

/// Result of queueing an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enqueue {
    /// Mailbox was idle; the caller must hand it to a scheduler
    Schedule,
    /// Already scheduled or in service
    Queued,
    /// Entity deregistered; envelope dropped
    Closed,
}

pub struct Mailbox {
    name: String,
    entity: Arc<dyn Entity>,
    queue: Mutex<VecDeque<Envelope>>,
    state: AtomicU8,
    active: AtomicUsize,
    closed: AtomicBool,
}

impl Mailbox {
    pub(crate) fn new(name: impl Into<String>, entity: Arc<dyn Entity>) -> Self {
        Self {
            name: name.into(),
            entity,
            queue: Mutex::new(VecDeque::new()),
            state: AtomicU8::new(IDLE),
            active: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Envelopes waiting for a worker
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn push(&self, envelope: Envelope) -> Enqueue {
        {
            let mut queue = self.queue.lock();
            if self.is_closed() {
                return Enqueue::Closed;
            }
            queue.push_back(envelope);
        }
        match self
            .state
            .compare_exchange(IDLE, SCHEDULED, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => Enqueue::Schedule,
            Err(_) => Enqueue::Queued,
        }
    }

    /// Claim the mailbox for one service round
    ///
    /// Fails loudly when the mailbox was not in the scheduled state or another
    /// worker is already inside it; both mean the scheduler handed it out
    /// twice.
    pub(crate) fn begin_service(&self, stats: &EngineStats) -> bool {
        if let Err(actual) =
            self.state
                .compare_exchange(SCHEDULED, IN_SERVICE, Ordering::SeqCst, Ordering::SeqCst)
        {
            stats.record_reentrancy();
            error!(
                entity = %self.name,
                state = actual,
                "Reentrancy violation: mailbox handed to a worker while not scheduled"
            );
            return false;
        }
        let inside = self.active.fetch_add(1, Ordering::SeqCst);
        if inside != 0 {
            stats.record_reentrancy();
            error!(
                entity = %self.name,
                concurrent = inside + 1,
                "Reentrancy violation: concurrent handler invocations"
            );
        }
        true
    }

    pub(crate) fn pop(&self) -> Option<Envelope> {
        self.queue.lock().pop_front()
    }

    /// Release the mailbox; returns true when it must be scheduled again
    pub(crate) fn end_service(&self) -> bool {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.state.store(IDLE, Ordering::SeqCst);
        if self.queue.lock().is_empty() {
            return false;
        }
        self.state
            .compare_exchange(IDLE, SCHEDULED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Run the entity handler, containing errors and panics
    pub(crate) fn invoke(&self, router: &Arc<Router>, envelope: &Envelope, stats: &EngineStats) {
        let ctx = Context::new(router, &self.name);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.entity.on_message(envelope, &ctx)));
        stats.record_delivered();

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                stats.record_failure();
                warn!(entity = %self.name, error = %e, envelope = ?envelope, "Handler failed");
            }
            Err(payload) => {
                stats.record_failure();
                error!(
                    entity = %self.name,
                    panic = panic_message(payload.as_ref()),
                    envelope = ?envelope,
                    "Handler panicked"
                );
            }
        }
    }

    /// Close the mailbox and discard everything still queued
    pub(crate) fn close(&self) -> usize {
        let mut queue = self.queue.lock();
        self.closed.store(true, Ordering::Release);
        let dropped = queue.len();
        queue.clear();
        dropped
    }
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("name", &self.name)
            .field("state", &self.state.load(Ordering::Relaxed))
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;

    fn mailbox() -> Mailbox {
        let entity = crate::entity::from_fn(|_: &Envelope, _: &Context<'_>| Ok::<(), HandlerError>(()));
        Mailbox::new("alice", Arc::new(entity))
    }

    #[test]
    fn test_only_first_push_schedules() {
        let mb = mailbox();
        assert_eq!(mb.push(Envelope::new("a")), Enqueue::Schedule);
        assert_eq!(mb.push(Envelope::new("b")), Enqueue::Queued);
        assert_eq!(mb.pending(), 2);
    }

    #[test]
    fn test_service_round_reschedules_residual_work() {
        let mb = mailbox();
        let stats = EngineStats::default();
        mb.push(Envelope::new("a"));
        mb.push(Envelope::new("b"));

        assert!(mb.begin_service(&stats));
        assert_eq!(mb.pop().map(|e| e.sender), Some("a".to_string()));
        assert!(mb.end_service());

        assert!(mb.begin_service(&stats));
        assert_eq!(mb.pop().map(|e| e.sender), Some("b".to_string()));
        assert!(!mb.end_service());

        // Idle again: the next producer schedules
        assert_eq!(mb.push(Envelope::new("c")), Enqueue::Schedule);
        assert_eq!(stats.snapshot().reentrancy_violations, 0);
    }

    #[test]
    fn test_double_entry_is_reported() {
        let mb = mailbox();
        let stats = EngineStats::default();
        mb.push(Envelope::new("a"));

        assert!(mb.begin_service(&stats));
        assert!(!mb.begin_service(&stats));
        assert_eq!(stats.snapshot().reentrancy_violations, 1);
    }

    #[test]
    fn test_push_while_in_service_does_not_schedule() {
        let mb = mailbox();
        let stats = EngineStats::default();
        mb.push(Envelope::new("a"));
        assert!(mb.begin_service(&stats));
        assert_eq!(mb.push(Envelope::new("b")), Enqueue::Queued);
        mb.pop();
        assert!(mb.end_service());
    }

    #[test]
    fn test_close_drops_pending_and_rejects_new() {
        let mb = mailbox();
        mb.push(Envelope::new("a"));
        mb.push(Envelope::new("b"));

        assert_eq!(mb.close(), 2);
        assert!(mb.is_closed());
        assert_eq!(mb.push(Envelope::new("c")), Enqueue::Closed);
        assert_eq!(mb.pending(), 0);
    }
}
