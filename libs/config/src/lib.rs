//! # Mycelium Configuration
//!
//! Centralized configuration and protocol constants for Mycelium platforms.
//!
//! ## Features
//!
//! - **Runtime configuration**: dispatch backend, pool sizes, distributed mode,
//!   discovery, heartbeat and serialization settings ([`RuntimeConfig`])
//! - **Layered loading**: built-in defaults < TOML file < `MYCELIUM__*`
//!   environment variables
//! - **Protocol constants**: discovery magic, packet size, reserved ports
//! - **Logging bootstrap**: `tracing-subscriber` installation driven by
//!   [`LoggingConfig`]
//!
//! ## Usage
//!
//! ```rust,no_run
//! use config::{RuntimeConfig, DispatchBackend};
//!
//! let config = RuntimeConfig::load(Some("mycelium.toml".as_ref()))?
//!     .with_backend(DispatchBackend::Synchronous);
//! config::logging::init_logging(&config.logging);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod defaults;
pub mod logging;
pub mod protocol;
pub mod runtime_config;

// Re-export commonly used types
pub use runtime_config::{
    ConfigError, DiscoveryConfig, DiscoveryMode, DispatchBackend, DispatchConfig,
    HeartbeatConfig, LoggingConfig, NetworkConfig, RuntimeConfig, SerializationFormat,
};
pub use logging::init_logging;
