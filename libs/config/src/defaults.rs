//! Default configuration values
//!
//! Used by the `Default` impls in [`crate::runtime_config`] and by serde when a
//! field is missing from a configuration file.

/// Dispatch engine defaults
pub mod dispatch {
    /// Scheduler threads
    pub const SCHEDULERS: usize = 2;

    /// Worker threads; zero means "one per available CPU"
    pub const WORKERS: usize = 0;
}

/// Inter-platform TCP defaults
pub mod network {
    pub const BIND_HOST: &str = "0.0.0.0";

    pub const LISTEN_PORT: u16 = 4242;

    /// Ports tried after the configured one when dynamic reassignment is on
    pub const PORT_ATTEMPTS: u16 = 16;

    /// Connection timeout (milliseconds)
    pub const CONNECT_TIMEOUT_MS: u64 = 2_000;

    /// Largest accepted frame (bytes)
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

    /// How long shutdown waits for disconnect notices to be written (milliseconds)
    pub const SHUTDOWN_FLUSH_MS: u64 = 1_000;
}

/// Discovery defaults
pub mod discovery {
    /// Administratively scoped multicast group
    pub const MULTICAST_GROUP: &str = "239.255.77.77";

    pub const PORT: u16 = 4243;

    /// Announce interval (milliseconds)
    pub const ANNOUNCE_INTERVAL_MS: u64 = 2_000;

    /// Mutual propagation wait for discovery-initiated handshakes (milliseconds)
    pub const HANDSHAKE_TIMEOUT_MS: u64 = 5_000;
}

/// Heartbeat defaults
pub mod heartbeat {
    pub const INTERVAL_MS: u64 = 1_000;

    /// Missed intervals before a peer is purged
    pub const TIMEOUT_MULTIPLIER: u32 = 3;
}
