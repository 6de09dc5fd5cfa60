//! # Mycelium Types
//!
//! Pure data shared by the directory, the router, the dispatch engine and the
//! network layer. Nothing in this crate performs I/O or holds locks.
//!
//! ## Contents
//!
//! - [`Envelope`]: the message value object routed between platform members
//! - [`Value`]: format-neutral payload tree (serializes with both the JSON and
//!   the bincode wire codecs)
//! - [`NodeAddress`], [`PlatformId`], [`EntityAddress`]: addressing primitives
//! - [`Notification`], [`NotificationCode`]: the typed failure/informational
//!   replies synthesized when resolution or delivery fails
//!
//! ## Envelope lifecycle
//!
//! ```text
//!  sender ──► Envelope::new("alice").to("bob")
//!                 │
//!                 ▼  fan-out clones via Envelope::readdressed()
//!             Router ──► mailbox (local)  |  network (remote, visited log += node)
//! ```
//!
//! Envelopes are immutable by convention: routing code clones before changing
//! the recipient, never mutates a shared instance.

pub mod address;
pub mod envelope;
pub mod errors;
pub mod notification;
pub mod value;

pub use address::{EntityAddress, NodeAddress, PlatformId, PlatformRef};
pub use envelope::{Conversation, Envelope, Event, Intent, performative};
pub use errors::AddressError;
pub use notification::{Notification, NotificationCode, NotificationKind};
pub use value::Value;

/// Sender name used for replies synthesized by the platform itself
pub const PLATFORM_SENDER: &str = "$platform";

/// Well-known name of the entity that executes generic capabilities
pub const GENERIC_HANDLER_NAME: &str = "$generic";

/// Prefix reserved for system entities
pub const SYSTEM_PREFIX: char = '$';

/// Separator between entity name and platform in `name@alias[:port]`
pub const PLATFORM_SEPARATOR: char = '@';
