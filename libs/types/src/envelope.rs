//! Message Envelope
//!
//! The unit routed by the platform. An envelope names its sender, optionally a
//! recipient, and carries either a plain payload, a capability request
//! ([`Intent`]) or an [`Event`]. Envelopes that crossed the network carry the
//! originating node so a reply can be built without any directory lookup on
//! the receiving side.

use crate::address::NodeAddress;
use crate::notification::{Notification, NotificationKind};
use crate::value::Value;
use crate::PLATFORM_SENDER;
use serde::{Deserialize, Serialize};

/// Common performatives
pub mod performative {
    pub const REQUEST: &str = "request";
    pub const INFORM: &str = "inform";
    pub const FAILURE: &str = "failure";
    pub const EVENT: &str = "event";
}

/// Capability request used for capability-based addressing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    /// Stable capability type tag; handlers subscribe by this key
    pub kind: String,
    /// Route to the platform's generic handler instead of a subscriber
    pub generic: bool,
    pub payload: Value,
}

impl Intent {
    pub fn new(kind: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            kind: kind.into(),
            generic: false,
            payload: payload.into(),
        }
    }

    pub fn generic(kind: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            generic: true,
            ..Self::new(kind, payload)
        }
    }
}

/// Published event delivered to every subscriber of its type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: String,
    pub payload: Value,
    /// Also deliver to subscribers on connected platforms
    pub propagate: bool,
}

impl Event {
    pub fn new(kind: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            kind: kind.into(),
            payload: payload.into(),
            propagate: false,
        }
    }

    pub fn propagated(mut self) -> Self {
        self.propagate = true;
        self
    }
}

/// Conversation tracking for request/reply exchanges
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub sequence: u64,
}

/// Routed message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: String,
    /// `None` for capability and event addressing
    pub recipient: Option<String>,
    pub performative: String,
    pub payload: Option<Value>,
    pub intent: Option<Intent>,
    pub event: Option<Event>,
    pub conversation: Option<Conversation>,
    /// Node the envelope originated from, set when it first leaves its platform
    pub sender_node: Option<NodeAddress>,
    /// Nodes that already forwarded this envelope
    pub visited: Vec<NodeAddress>,
    /// Node hosting the recipient, known when this envelope answers a
    /// network-borne request
    pub reply_node: Option<NodeAddress>,
    /// Set on forwarded capability requests so the peer never forwards again
    pub remote_resolution: bool,
    /// Present on platform-synthesized replies
    pub notification: Option<Notification>,
}

impl Envelope {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            recipient: None,
            performative: performative::REQUEST.to_string(),
            payload: None,
            intent: None,
            event: None,
            conversation: None,
            sender_node: None,
            visited: Vec::new(),
            reply_node: None,
            remote_resolution: false,
            notification: None,
        }
    }

    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    pub fn with_performative(mut self, performative: impl Into<String>) -> Self {
        self.performative = performative.into();
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Value>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intent = Some(intent);
        self
    }

    pub fn with_event(mut self, event: Event) -> Self {
        self.performative = performative::EVENT.to_string();
        self.event = Some(event);
        self
    }

    pub fn in_conversation(mut self, id: impl Into<String>, sequence: u64) -> Self {
        self.conversation = Some(Conversation {
            id: id.into(),
            sequence,
        });
        self
    }

    /// Clone with a different recipient (fan-out)
    pub fn readdressed(&self, recipient: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.recipient = Some(recipient.into());
        copy
    }

    /// Start a reply addressed to this envelope's sender
    ///
    /// The conversation continues with the next sequence number and the
    /// sender node is carried over so the reply can cross back over the
    /// network.
    pub fn reply(&self, from: impl Into<String>) -> Self {
        let mut reply = Envelope::new(from).to(self.sender.clone());
        reply.performative = performative::INFORM.to_string();
        reply.conversation = self.conversation.as_ref().map(|c| Conversation {
            id: c.id.clone(),
            sequence: c.sequence + 1,
        });
        reply.reply_node = self.sender_node;
        reply
    }

    /// Build the platform's typed notification reply to this envelope
    pub fn notification_reply(&self, kind: NotificationKind, notification: Notification) -> Self {
        let mut reply = self.reply(PLATFORM_SENDER);
        reply.performative = kind.performative().to_string();
        reply.notification = Some(notification);
        reply
    }

    /// Whether the envelope reached this platform through the network
    pub fn is_from_network(&self) -> bool {
        !self.visited.is_empty()
    }

    pub fn has_visited(&self, node: &NodeAddress) -> bool {
        self.visited.contains(node)
    }

    /// Record a forwarding hop, stamping the origin node on the first one
    pub fn mark_forwarded_by(&mut self, node: NodeAddress) {
        if self.sender_node.is_none() {
            self.sender_node = Some(node);
        }
        if !self.visited.contains(&node) {
            self.visited.push(node);
        }
    }

    pub fn is_notification(&self) -> bool {
        self.notification.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::NotificationCode;

    fn node(port: u16) -> NodeAddress {
        NodeAddress::new("127.0.0.1".parse().unwrap(), port)
    }

    #[test]
    fn test_builder_and_readdress() {
        let env = Envelope::new("alice")
            .to("bob")
            .with_payload("hi")
            .in_conversation("c-1", 4);
        let copy = env.readdressed("carol");

        assert_eq!(env.recipient.as_deref(), Some("bob"));
        assert_eq!(copy.recipient.as_deref(), Some("carol"));
        assert_eq!(copy.payload, env.payload);
    }

    #[test]
    fn test_reply_continues_conversation() {
        let env = Envelope::new("alice").to("bob").in_conversation("c-1", 4);
        let reply = env.reply("bob");

        assert_eq!(reply.sender, "bob");
        assert_eq!(reply.recipient.as_deref(), Some("alice"));
        assert_eq!(reply.conversation.unwrap().sequence, 5);
    }

    #[test]
    fn test_forwarding_stamps_origin_once() {
        let mut env = Envelope::new("alice").to("bob");
        assert!(!env.is_from_network());

        env.mark_forwarded_by(node(1));
        env.mark_forwarded_by(node(2));
        env.mark_forwarded_by(node(2));

        assert_eq!(env.sender_node, Some(node(1)));
        assert_eq!(env.visited, vec![node(1), node(2)]);
        assert!(env.is_from_network());
        assert!(env.has_visited(&node(2)));
    }

    #[test]
    fn test_notification_reply_targets_sender_node() {
        let mut env = Envelope::new("alice").to("ghost");
        env.mark_forwarded_by(node(7));

        let reply = env.notification_reply(
            NotificationKind::Failure,
            Notification::new(NotificationCode::RecipientNotFoundAnywhere, "ghost"),
        );

        assert_eq!(reply.sender, PLATFORM_SENDER);
        assert_eq!(reply.recipient.as_deref(), Some("alice"));
        assert_eq!(reply.performative, performative::FAILURE);
        assert_eq!(reply.reply_node, Some(node(7)));
        assert!(reply.is_notification());
    }
}
