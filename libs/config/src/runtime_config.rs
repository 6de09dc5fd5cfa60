//! Runtime Configuration Module
//!
//! Provides configuration loading and validation for a Mycelium platform.
//! Supports loading from TOML files with `MYCELIUM__SECTION__KEY` environment
//! overrides; every field has a default so an empty file is valid.

use crate::defaults;
use crate::protocol;
use anyhow::{Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Validation failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for '{field}': {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Main runtime configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub dispatch: DispatchConfig,
    pub network: NetworkConfig,
    pub discovery: DiscoveryConfig,
    pub heartbeat: HeartbeatConfig,
    pub logging: LoggingConfig,
}

/// Message delivery backend, fixed at start-up
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DispatchBackend {
    /// Scheduler and worker thread pools
    #[default]
    Scheduled,
    /// Direct call into the recipient on the sender's thread
    Synchronous,
}

/// Dispatch engine settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    pub backend: DispatchBackend,
    pub schedulers: usize,
    /// Zero selects the available CPU count
    pub workers: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            backend: DispatchBackend::default(),
            schedulers: defaults::dispatch::SCHEDULERS,
            workers: defaults::dispatch::WORKERS,
        }
    }
}

impl DispatchConfig {
    /// Worker count with the zero default resolved
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// Wire serialization format
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SerializationFormat {
    #[default]
    Json,
    Bincode,
}

impl SerializationFormat {
    /// Tag announced in discovery packets
    pub fn tag(&self) -> &'static str {
        match self {
            SerializationFormat::Json => protocol::serialization::JSON,
            SerializationFormat::Bincode => protocol::serialization::BINCODE,
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            protocol::serialization::JSON => Some(SerializationFormat::Json),
            protocol::serialization::BINCODE => Some(SerializationFormat::Bincode),
            _ => None,
        }
    }
}

/// Inter-platform networking
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    pub distributed: bool,
    pub bind_host: String,
    pub listen_port: u16,
    /// Try following ports when the listen port is taken
    pub dynamic_port: bool,
    pub port_attempts: u16,
    pub serialization: SerializationFormat,
    pub connect_timeout_ms: u64,
    pub max_frame_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            distributed: false,
            bind_host: defaults::network::BIND_HOST.to_string(),
            listen_port: defaults::network::LISTEN_PORT,
            dynamic_port: true,
            port_attempts: defaults::network::PORT_ATTEMPTS,
            serialization: SerializationFormat::default(),
            connect_timeout_ms: defaults::network::CONNECT_TIMEOUT_MS,
            max_frame_size: defaults::network::MAX_FRAME_SIZE,
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// How announce packets are sent
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    #[default]
    Multicast,
    Broadcast,
}

/// UDP discovery settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    pub mode: DiscoveryMode,
    pub multicast_group: String,
    pub port: u16,
    pub announce_interval_ms: u64,
    /// Stop announcing while at least one peer is connected
    pub quiet_when_connected: bool,
    pub handshake_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: DiscoveryMode::default(),
            multicast_group: defaults::discovery::MULTICAST_GROUP.to_string(),
            port: defaults::discovery::PORT,
            announce_interval_ms: defaults::discovery::ANNOUNCE_INTERVAL_MS,
            quiet_when_connected: false,
            handshake_timeout_ms: defaults::discovery::HANDSHAKE_TIMEOUT_MS,
        }
    }
}

impl DiscoveryConfig {
    pub fn announce_interval(&self) -> Duration {
        Duration::from_millis(self.announce_interval_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Parsed multicast group
    pub fn group(&self) -> std::result::Result<Ipv4Addr, ConfigError> {
        let group: Ipv4Addr = self.multicast_group.parse().map_err(|_| {
            ConfigError::invalid(
                "discovery.multicast_group",
                format!("'{}' is not an IPv4 address", self.multicast_group),
            )
        })?;
        if !group.is_multicast() {
            return Err(ConfigError::invalid(
                "discovery.multicast_group",
                format!("{} is not a multicast address", group),
            ));
        }
        Ok(group)
    }
}

/// Peer liveness settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub timeout_multiplier: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: defaults::heartbeat::INTERVAL_MS,
            timeout_multiplier: defaults::heartbeat::TIMEOUT_MULTIPLIER,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Silence after which a peer is considered gone
    pub fn timeout(&self) -> Duration {
        self.interval() * self.timeout_multiplier
    }
}

/// Log output settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from an optional file with environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, "MYCELIUM")
    }

    /// Load with a custom environment prefix
    pub fn load_with_prefix(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading runtime config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        // Override with environment variables (MYCELIUM__NETWORK__LISTEN_PORT=...)
        builder = builder.add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: RuntimeConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate().context("Invalid configuration")?;
        debug!(?config, "Runtime configuration loaded");
        Ok(config)
    }

    /// Parse a TOML document directly
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: RuntimeConfig =
            toml::from_str(content).context("Failed to parse TOML configuration")?;
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.dispatch.schedulers == 0 {
            return Err(ConfigError::invalid(
                "dispatch.schedulers",
                "at least one scheduler is required",
            ));
        }
        if self.heartbeat.timeout_multiplier == 0 {
            return Err(ConfigError::invalid(
                "heartbeat.timeout_multiplier",
                "must be at least 1",
            ));
        }
        if self.heartbeat.enabled && self.heartbeat.interval_ms == 0 {
            return Err(ConfigError::invalid(
                "heartbeat.interval_ms",
                "must be positive when heartbeat is enabled",
            ));
        }
        if self.discovery.announce_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "discovery.announce_interval_ms",
                "must be positive",
            ));
        }
        if self.network.max_frame_size == 0 {
            return Err(ConfigError::invalid("network.max_frame_size", "must be positive"));
        }
        if self.network.distributed
            && self.discovery.enabled
            && self.discovery.mode == DiscoveryMode::Multicast
        {
            self.discovery.group()?;
        }
        Ok(())
    }

    /// Distributed configuration listening on `port` of the loopback host,
    /// discovery disabled; the usual starting point for tests
    pub fn distributed(port: u16) -> Self {
        let mut config = Self::default();
        config.network.distributed = true;
        config.network.bind_host = "127.0.0.1".to_string();
        config.network.listen_port = port;
        config.discovery.enabled = false;
        config
    }

    pub fn with_backend(mut self, backend: DispatchBackend) -> Self {
        self.dispatch.backend = backend;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.dispatch.workers = workers;
        self
    }

    pub fn with_schedulers(mut self, schedulers: usize) -> Self {
        self.dispatch.schedulers = schedulers;
        self
    }

    pub fn with_serialization(mut self, format: SerializationFormat) -> Self {
        self.network.serialization = format;
        self
    }
}
