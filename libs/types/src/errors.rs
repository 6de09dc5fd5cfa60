//! Error types for address parsing and validation

use thiserror::Error;

/// Errors raised while parsing node and entity addresses
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Input was empty where a value is required
    #[error("Empty {what}")]
    Empty { what: &'static str },

    /// Port component is not a valid u16
    #[error("Invalid port '{input}'")]
    InvalidPort { input: String },

    /// Host component is not an IP address
    #[error("Invalid host '{input}'")]
    InvalidHost { input: String },

    /// Platform identifier is not a valid UUID
    #[error("Invalid platform id '{input}'")]
    InvalidPlatformId { input: String },

    /// Input does not follow `host:port`
    #[error("Malformed address '{input}': expected {expected}")]
    Malformed { input: String, expected: &'static str },
}
