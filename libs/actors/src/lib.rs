//! # Mycelium Actors
//!
//! Message-passing runtime for named entities inside one process, optionally
//! spanning several platforms connected by the network layer.
//!
//! ```text
//!   Platform ──► Router ──┬──► AddressDirectory (names, capabilities, events, roles)
//!                         ├──► Dispatcher ──► Mailbox ──► Entity::on_message
//!                         └──► NetworkLayer ──► peers
//! ```
//!
//! - [`Platform`]: start-up, registration, every send mode, connections
//! - [`Router`]: resolution (unicast, capability, event, broadcast, rolecast,
//!   groupcast, randomcast, fuzzycast) and inbound network delivery
//! - [`dispatch`]: scheduler/worker engine or synchronous delivery
//! - [`Router::notify`]: typed failure and informational replies
//!
//! # Example
//!
//! ```rust,no_run
//! use actors::{entity, Platform};
//! use types::Envelope;
//!
//! let platform = Platform::local()?;
//! platform.register("echo", entity::from_fn(|env, ctx| {
//!     ctx.reply(env, env.payload.clone().unwrap_or_default())?;
//!     Ok(())
//! }))?;
//! platform.send(Envelope::new("client").to("echo").with_payload("hi"))?;
//! # Ok::<(), actors::RouterError>(())
//! ```

pub mod cast;
pub mod directory;
pub mod dispatch;
pub mod entity;
pub mod error;
pub mod generic;
mod notify;
pub mod platform;
pub mod router;

pub use cast::{CandidateFilter, Scope};
pub use directory::{AddressDirectory, RoleRecord};
pub use dispatch::{EngineStats, StatsSnapshot};
pub use entity::{Context, Entity};
pub use error::{HandlerError, RegistrationError, Result, RouterError};
pub use generic::{GenericAction, GenericActions};
pub use platform::Platform;
pub use router::{GroupMembership, Router};
