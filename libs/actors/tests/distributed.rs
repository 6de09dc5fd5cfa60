//! Two platforms on loopback: remote unicast and replies, remote capability
//! resolution, platform addressing, global casts and propagation.

mod common;

use actors::{entity, CandidateFilter, Platform, Scope};
use common::*;
use std::net::TcpListener;
use std::time::{Duration, Instant};
use types::{Envelope, Event, Intent, NodeAddress, NotificationCode, NotificationKind, Value};

fn pair() -> (Platform, Platform, NodeAddress) {
    let a = distributed();
    let b = distributed();
    let port = b.local_node().unwrap().port;
    let node_b = a.initiate_with("127.0.0.1", port, WAIT).unwrap();
    eventually("b to complete the handshake", || b.remote_snapshot().iter().any(|n| n.propagated));
    (a, b, node_b)
}

#[test]
fn test_remote_unicast_and_reply() {
    let a = distributed();
    let b = distributed();
    let alice = collector(&a, "alice");
    b.register(
        "echo",
        entity::from_fn(|env, ctx| {
            ctx.reply(env, env.payload.clone().unwrap_or_default())?;
            Ok(())
        }),
    )
    .unwrap();
    a.initiate_with("127.0.0.1", b.local_node().unwrap().port, WAIT).unwrap();

    a.send(Envelope::new("alice").to("echo").with_payload("ping")).unwrap();

    let reply = next(&alice);
    assert_eq!(reply.sender, "echo");
    assert_eq!(reply.payload, Some(Value::from("ping")));
}

#[test]
fn test_registration_propagates_incrementally() {
    let (a, b, _) = pair();

    collector(&b, "late");
    eventually("late to reach a", || a.remote_names().contains(&"late".to_string()));

    b.deregister("late").unwrap();
    eventually("late to leave a", || !a.remote_names().contains(&"late".to_string()));
}

#[test]
fn test_unknown_everywhere() {
    let (a, _b, _) = pair();
    let alice = collector(&a, "alice");

    a.send(Envelope::new("alice").to("nobody")).unwrap();
    expect_notification(&alice, NotificationCode::RecipientNotFoundAnywhere);
}

#[test]
fn test_capability_resolved_by_peer() {
    let (a, b, _) = pair();
    let alice = collector(&a, "alice");
    b.register(
        "translator",
        entity::from_fn(|env, ctx| {
            ctx.reply(env, "hello")?;
            Ok(())
        }),
    )
    .unwrap();
    b.subscribe_capability("translator", "translate").unwrap();

    a.send(Envelope::new("alice").with_intent(Intent::new("translate", "bonjour")))
        .unwrap();

    let forwarded = expect_notification(&alice, NotificationCode::CapabilityForwardedToPeers);
    assert_eq!(forwarded.notification.unwrap().kind(), NotificationKind::Information);

    // The peer's notice and the handler's reply race each other
    let mut rest: Vec<Envelope> = (0..2).map(|_| next(&alice)).collect();
    rest.sort_by_key(|env| env.is_notification());
    assert_eq!(rest[0].sender, "translator");
    assert_eq!(rest[0].payload, Some(Value::from("hello")));
    assert_eq!(
        rest[1].notification.as_ref().map(|n| n.code),
        Some(NotificationCode::CapabilityForwardingInformational)
    );
}

#[test]
fn test_capability_missing_on_peer() {
    let (a, _b, _) = pair();
    let alice = collector(&a, "alice");

    a.send(Envelope::new("alice").with_intent(Intent::new("teleport", Value::Null)))
        .unwrap();

    expect_notification(&alice, NotificationCode::CapabilityForwardedToPeers);
    expect_notification(&alice, NotificationCode::CapabilityNotFoundOnRemotePlatform);
    assert_quiet(&alice);
}

#[test]
fn test_distributed_without_peers_reports_local_miss() {
    let a = distributed();
    let alice = collector(&a, "alice");

    a.send(Envelope::new("alice").with_intent(Intent::new("translate", Value::Null)))
        .unwrap();

    expect_notification(&alice, NotificationCode::CapabilityHandlerNotFoundLocal);
}

#[test]
fn test_platform_addressing_by_alias_and_literal() {
    let a = distributed();
    let b = distributed();
    let port = b.local_node().unwrap().port;
    let bob = collector(&b, "bob");
    let alice = collector(&a, "alice");

    a.connect("127.0.0.1", port, Some("lab"), WAIT).unwrap();

    a.send(Envelope::new("alice").to("bob@lab").with_payload(1i64)).unwrap();
    assert_eq!(next(&bob).recipient.as_deref(), Some("bob"));

    a.send(Envelope::new("alice").to(format!("bob@127.0.0.1:{}", port)).with_payload(2i64))
        .unwrap();
    assert_eq!(next(&bob).payload, Some(Value::Int(2)));

    a.send(Envelope::new("alice").to("bob@elsewhere")).unwrap();
    expect_notification(&alice, NotificationCode::RemotePlatformUnknown);

    assert_eq!(a.remove_alias("lab").unwrap().map(|n| n.port), Some(port));
    a.send(Envelope::new("alice").to("bob@lab")).unwrap();
    expect_notification(&alice, NotificationCode::RemotePlatformUnknown);
}

#[test]
fn test_remote_entity_missing_on_named_platform() {
    let (a, _b, node_b) = pair();
    let alice = collector(&a, "alice");

    a.send(Envelope::new("alice").to(format!("ghost@127.0.0.1:{}", node_b.port)))
        .unwrap();

    // Reported by the peer, routed back through the sender node
    expect_notification(&alice, NotificationCode::RecipientNotFoundLocal);
}

#[test]
fn test_global_broadcast_and_rolecast() {
    let (a, b, _) = pair();
    let local = collector(&a, "local");
    let remote = collector(&b, "remote");
    let judge = collector(&b, "judge");
    b.attach_role("judge", "referee").unwrap();

    let delivered = a
        .send_broadcast(Envelope::new("announcer").with_payload("all"), Scope::Global)
        .unwrap();
    assert_eq!(delivered, vec!["local".to_string()]);
    next(&local);
    next(&remote);
    next(&judge);

    a.send_rolecast(Envelope::new("announcer").with_payload("ruling"), "referee", Scope::Global)
        .unwrap();
    let ruling = next(&judge);
    assert_eq!(ruling.recipient.as_deref(), Some("judge"));
    assert_eq!(ruling.payload, Some(Value::from("ruling")));
    assert_quiet(&remote);
    assert_quiet(&local);
}

#[test]
fn test_propagated_events_cross_once() {
    let (a, b, _) = pair();
    let here = collector(&a, "here");
    let there = collector(&b, "there");
    a.subscribe_event("here", "alarm").unwrap();
    b.subscribe_event("there", "alarm").unwrap();

    a.send(Envelope::new("siren").with_event(Event::new("alarm", 1i64).propagated()))
        .unwrap();
    next(&here);
    next(&there);

    a.send(Envelope::new("siren").with_event(Event::new("alarm", 2i64))).unwrap();
    next(&here);
    assert_quiet(&there);
}

#[test]
fn test_global_randomcast_includes_remote_names() {
    let (a, b, _) = pair();
    let remote = collector(&b, "remote");
    eventually("remote to propagate", || a.remote_names().contains(&"remote".to_string()));

    let chosen = a
        .send_randomcast(Envelope::new("alice"), 1, Scope::Global, &CandidateFilter::All)
        .unwrap();
    assert_eq!(chosen, vec!["remote".to_string()]);
    next(&remote);
}

#[test]
fn test_handshake_timeout_leaves_no_residue() {
    let a = distributed();
    let port = {
        let unused = TcpListener::bind("127.0.0.1:0").unwrap();
        unused.local_addr().unwrap().port()
    };

    let timeout = Duration::from_millis(500);
    let started = Instant::now();
    assert!(a.initiate_with("127.0.0.1", port, timeout).is_err());
    assert!(started.elapsed() < timeout + Duration::from_millis(500));
    assert!(a.remote_snapshot().is_empty());
}

#[test]
fn test_shutdown_disconnects_peers() {
    let (a, b, _) = pair();
    collector(&a, "alice");
    eventually("alice to reach b", || b.remote_names().contains(&"alice".to_string()));

    a.shutdown();
    eventually("b to forget a", || b.remote_snapshot().is_empty());
    assert!(b.remote_names().is_empty());
}
