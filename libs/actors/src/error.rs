//! Runtime Error Types
//!
//! Only API misuse surfaces as `Err`. Resolution and delivery failures are
//! reported to the sender as notification envelopes instead.

use network::TransportError;
use thiserror::Error;

/// Directory registration failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("Entity name '{name}' is already registered")]
    DuplicateName { name: String },

    #[error("Entity name '{name}' is reserved")]
    ReservedName { name: String },

    #[error("Invalid entity name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("Unknown entity '{name}'")]
    UnknownEntity { name: String },
}

/// Errors returned by platform and router operations
#[derive(Debug, Error)]
pub enum RouterError {
    /// Groupcast requires an identified sender
    #[error("Envelope has no sender")]
    MissingSender,

    /// Neither a recipient, a capability nor an event
    #[error("Envelope has no recipient, intent or event")]
    MissingRecipient,

    #[error("Platform is not running")]
    NotRunning,

    /// Operation needs the network layer but the platform is local-only
    #[error("Platform is not distributed")]
    NotDistributed,

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error("Network error: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to start thread '{name}': {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl RouterError {
    pub fn category(&self) -> &'static str {
        match self {
            RouterError::MissingSender => "missing_sender",
            RouterError::MissingRecipient => "missing_recipient",
            RouterError::NotRunning => "not_running",
            RouterError::NotDistributed => "not_distributed",
            RouterError::Registration(_) => "registration",
            RouterError::Config(_) => "configuration",
            RouterError::Transport(e) => e.category(),
            RouterError::ThreadSpawn { .. } => "thread_spawn",
        }
    }
}

/// Failure reported by an entity handler or a generic action
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn msg(message: impl Into<String>) -> Self {
        HandlerError::Message(message.into())
    }
}

impl From<RouterError> for HandlerError {
    fn from(err: RouterError) -> Self {
        HandlerError::Other(anyhow::Error::new(err))
    }
}

/// Result type alias for router operations
pub type Result<T> = std::result::Result<T, RouterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(RouterError::NotRunning.category(), "not_running");
        let err: RouterError = RegistrationError::UnknownEntity { name: "bob".into() }.into();
        assert_eq!(err.category(), "registration");
        assert_eq!(err.to_string(), "Unknown entity 'bob'");
    }

    #[test]
    fn test_router_error_inside_handler() {
        let err: HandlerError = RouterError::MissingRecipient.into();
        assert!(matches!(err, HandlerError::Other(_)));
        assert_eq!(err.to_string(), "Envelope has no recipient, intent or event");
    }
}
