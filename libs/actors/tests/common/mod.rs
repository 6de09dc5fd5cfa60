//! Shared helpers for platform tests

#![allow(dead_code)]

use actors::{entity, Platform};
use config::{DispatchBackend, RuntimeConfig};
use crossbeam_channel::{unbounded, Receiver};
use std::time::{Duration, Instant};
use types::{Envelope, NotificationCode};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn synchronous() -> Platform {
    Platform::start(RuntimeConfig::default().with_backend(DispatchBackend::Synchronous)).unwrap()
}

pub fn scheduled(workers: usize) -> Platform {
    Platform::start(RuntimeConfig::default().with_workers(workers)).unwrap()
}

pub fn distributed() -> Platform {
    Platform::start(RuntimeConfig::distributed(0)).unwrap()
}

/// Register `name` as an entity that records everything it receives
pub fn collector(platform: &Platform, name: &str) -> Receiver<Envelope> {
    let (tx, rx) = unbounded();
    platform
        .register(
            name,
            entity::from_fn(move |env, _ctx| {
                let _ = tx.send(env.clone());
                Ok(())
            }),
        )
        .unwrap();
    rx
}

pub fn next(rx: &Receiver<Envelope>) -> Envelope {
    rx.recv_timeout(WAIT).expect("no envelope arrived")
}

/// Next envelope, which must be a notification with `code`
pub fn expect_notification(rx: &Receiver<Envelope>, code: NotificationCode) -> Envelope {
    let env = next(rx);
    let notification = env
        .notification
        .as_ref()
        .unwrap_or_else(|| panic!("expected {:?}, got {:?}", code, env));
    assert_eq!(notification.code, code, "unexpected notification {:?}", env);
    env
}

pub fn assert_quiet(rx: &Receiver<Envelope>) {
    if let Ok(env) = rx.recv_timeout(Duration::from_millis(100)) {
        panic!("unexpected envelope {:?}", env);
    }
}

pub fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(10));
    }
}
