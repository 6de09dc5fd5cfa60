//! Scheduler / Worker Engine
//!
//! Scheduled mailboxes are spread round-robin over N scheduler threads, which
//! feed one job queue shared by all M worker threads. Whichever worker is idle
//! takes the next job, so a handler that never returns only costs its own
//! worker. A worker serves exactly one envelope per round and never keeps a
//! mailbox for itself: residual work goes back through a scheduler.

use super::mailbox::{Enqueue, Mailbox};
use super::stats::EngineStats;
use super::Dispatcher;
use crate::error::{Result, RouterError};
use crate::router::Router;
use config::{DispatchBackend, DispatchConfig};
use crossbeam_channel::{select, unbounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};
use types::Envelope;

/// A scheduled mailbox travelling between threads
struct Job {
    mailbox: Arc<Mailbox>,
    router: Weak<Router>,
}

/// Scheduler lanes fed round-robin
struct Ring {
    lanes: Vec<Sender<Job>>,
    next: AtomicUsize,
}

impl Ring {
    fn new(lanes: Vec<Sender<Job>>) -> Self {
        Self {
            lanes,
            next: AtomicUsize::new(0),
        }
    }

    fn submit(&self, job: Job) {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.lanes.len();
        if let Err(e) = self.lanes[index].send(job) {
            debug!(entity = %e.0.mailbox.name(), lane = index, "Engine stopped, mailbox not scheduled");
        }
    }
}

pub(crate) struct ScheduledEngine {
    schedulers: Arc<Ring>,
    stop: Mutex<Option<Sender<()>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<EngineStats>,
}

impl ScheduledEngine {
    pub(crate) fn start(config: &DispatchConfig, stats: Arc<EngineStats>) -> Result<Self> {
        let scheduler_count = config.schedulers.max(1);
        let worker_count = config.effective_workers();

        let (stop_tx, stop_rx) = unbounded::<()>();
        let (scheduler_tx, scheduler_rx): (Vec<_>, Vec<_>) = (0..scheduler_count).map(|_| unbounded()).unzip();
        let (work_tx, work_rx) = unbounded::<Job>();

        let schedulers = Arc::new(Ring::new(scheduler_tx));

        let engine = Self {
            schedulers: schedulers.clone(),
            stop: Mutex::new(Some(stop_tx)),
            threads: Mutex::new(Vec::with_capacity(scheduler_count + worker_count)),
            stats: stats.clone(),
        };

        for (index, jobs) in scheduler_rx.into_iter().enumerate() {
            let work = work_tx.clone();
            let stop = stop_rx.clone();
            engine.spawn(format!("mycelium-sched-{}", index), move || {
                scheduler_loop(index, jobs, work, stop)
            })?;
        }
        drop(work_tx);

        for index in 0..worker_count {
            let jobs = work_rx.clone();
            let schedulers = schedulers.clone();
            let stop = stop_rx.clone();
            let stats = stats.clone();
            engine.spawn(format!("mycelium-worker-{}", index), move || {
                worker_loop(index, jobs, schedulers, stop, stats)
            })?;
        }

        info!(
            schedulers = scheduler_count,
            workers = worker_count,
            "Dispatch engine started"
        );
        Ok(engine)
    }

    fn spawn(&self, name: String, body: impl FnOnce() + Send + 'static) -> Result<()> {
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(body)
            .map_err(|source| {
                // Threads already running exit once the stop channel closes
                self.stop.lock().take();
                RouterError::ThreadSpawn { name, source }
            })?;
        self.threads.lock().push(handle);
        Ok(())
    }
}

impl Dispatcher for ScheduledEngine {
    fn dispatch(&self, router: &Arc<Router>, mailbox: Arc<Mailbox>, envelope: Envelope) {
        match mailbox.push(envelope) {
            Enqueue::Schedule => self.schedulers.submit(Job {
                mailbox,
                router: Arc::downgrade(router),
            }),
            Enqueue::Queued => {}
            Enqueue::Closed => {
                self.stats.record_dropped(1);
                debug!(entity = %mailbox.name(), "Mailbox closed, envelope dropped");
            }
        }
    }

    fn shutdown(&self) {
        let Some(stop) = self.stop.lock().take() else {
            return;
        };
        drop(stop);

        let current = thread::current().id();
        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in handles {
            if handle.thread().id() == current {
                // Shutdown requested from inside a handler; this thread exits
                // on its own once the handler returns
                continue;
            }
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            if handle.join().is_err() {
                warn!(thread = %name, "Dispatch thread terminated abnormally");
            }
        }
        info!("Dispatch engine stopped");
    }

    fn backend(&self) -> DispatchBackend {
        DispatchBackend::Scheduled
    }
}

fn scheduler_loop(index: usize, jobs: Receiver<Job>, work: Sender<Job>, stop: Receiver<()>) {
    debug!(scheduler = index, "Scheduler started");
    loop {
        select! {
            recv(jobs) -> job => match job {
                Ok(_) if stopped(&stop) => break,
                Ok(job) => {
                    if let Err(e) = work.send(job) {
                        debug!(entity = %e.0.mailbox.name(), "Workers stopped, mailbox not served");
                        break;
                    }
                }
                Err(_) => break,
            },
            recv(stop) -> _ => break,
        }
    }
    debug!(scheduler = index, "Scheduler stopped");
}

fn worker_loop(
    index: usize,
    jobs: Receiver<Job>,
    schedulers: Arc<Ring>,
    stop: Receiver<()>,
    stats: Arc<EngineStats>,
) {
    debug!(worker = index, "Worker started");
    loop {
        select! {
            recv(jobs) -> job => match job {
                // select! picks randomly among ready operations; a closed stop
                // channel must win over queued work
                Ok(_) if stopped(&stop) => break,
                Ok(job) => serve(job, &schedulers, &stats),
                Err(_) => break,
            },
            recv(stop) -> _ => break,
        }
    }
    debug!(worker = index, "Worker stopped");
}

fn stopped(stop: &Receiver<()>) -> bool {
    matches!(stop.try_recv(), Err(TryRecvError::Disconnected))
}

fn serve(job: Job, schedulers: &Ring, stats: &EngineStats) {
    let Some(router) = job.router.upgrade() else {
        return;
    };
    if !job.mailbox.begin_service(stats) {
        return;
    }
    if let Some(envelope) = job.mailbox.pop() {
        job.mailbox.invoke(&router, &envelope, stats);
    }
    drop(router);
    if job.mailbox.end_service() {
        schedulers.submit(job);
    }
}
