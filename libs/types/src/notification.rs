//! Notification Taxonomy
//!
//! Typed replies synthesized by the platform and sent back to the originating
//! sender when resolution or delivery fails, or when the router forwarded a
//! request somewhere the sender did not explicitly ask for. None of these are
//! fatal; the router never returns them as `Err`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity class of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    /// The request was not (and will not be) delivered
    Failure,
    /// The request was handled in a way the sender may want to know about
    Information,
}

impl NotificationKind {
    /// Performative used on the reply envelope
    pub fn performative(&self) -> &'static str {
        match self {
            NotificationKind::Failure => crate::performative::FAILURE,
            NotificationKind::Information => crate::performative::INFORM,
        }
    }
}

/// Stable notification codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum NotificationCode {
    RecipientNotFoundLocal = 1,
    RecipientNotFoundAnywhere = 2,
    CapabilityHandlerNotFoundLocal = 3,
    CapabilityForwardedToPeers = 4,
    CapabilityForwardingInformational = 5,
    RemotePlatformUnknown = 6,
    CapabilityNotFoundOnRemotePlatform = 7,
    InvalidGenericCapability = 8,
    GenericCapabilityExecutionFailed = 9,
    InsufficientRandomcastCandidates = 10,
    InvalidFuzzycastQuota = 11,
}

impl NotificationCode {
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Default severity for this code
    pub fn kind(&self) -> NotificationKind {
        match self {
            NotificationCode::CapabilityForwardedToPeers
            | NotificationCode::CapabilityForwardingInformational => NotificationKind::Information,
            _ => NotificationKind::Failure,
        }
    }

    /// Human-readable summary, used in logs and reply payloads
    pub fn summary(&self) -> &'static str {
        match self {
            NotificationCode::RecipientNotFoundLocal => "recipient not found on this platform",
            NotificationCode::RecipientNotFoundAnywhere => {
                "recipient not found locally nor on any connected platform"
            }
            NotificationCode::CapabilityHandlerNotFoundLocal => {
                "no local handler registered for capability"
            }
            NotificationCode::CapabilityForwardedToPeers => {
                "capability forwarded to connected platforms for resolution"
            }
            NotificationCode::CapabilityForwardingInformational => {
                "forwarded capability resolved by a remote platform"
            }
            NotificationCode::RemotePlatformUnknown => "named platform is not connected",
            NotificationCode::CapabilityNotFoundOnRemotePlatform => {
                "remote platform has no handler for forwarded capability"
            }
            NotificationCode::InvalidGenericCapability => "capability cannot be executed generically",
            NotificationCode::GenericCapabilityExecutionFailed => {
                "generic capability execution failed"
            }
            NotificationCode::InsufficientRandomcastCandidates => {
                "not enough candidates for randomcast"
            }
            NotificationCode::InvalidFuzzycastQuota => "fuzzycast quota outside [0, 1]",
        }
    }
}

impl fmt::Display for NotificationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.as_u16())
    }
}

/// Typed notification body carried in a reply envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub code: NotificationCode,
    /// Free-form context (the unresolved name, capability type, platform alias, ...)
    pub detail: String,
    /// Requested count (randomcast)
    pub requested: Option<usize>,
    /// Available candidate count (randomcast)
    pub available: Option<usize>,
    /// Rejected quota (fuzzycast)
    pub quota: Option<f64>,
}

impl Notification {
    pub fn new(code: NotificationCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
            requested: None,
            available: None,
            quota: None,
        }
    }

    pub fn insufficient_candidates(requested: usize, available: usize) -> Self {
        Self {
            requested: Some(requested),
            available: Some(available),
            ..Self::new(
                NotificationCode::InsufficientRandomcastCandidates,
                format!("requested {} but only {} available", requested, available),
            )
        }
    }

    pub fn invalid_quota(quota: f64) -> Self {
        Self {
            quota: Some(quota),
            ..Self::new(
                NotificationCode::InvalidFuzzycastQuota,
                format!("quota {} is outside [0, 1]", quota),
            )
        }
    }

    pub fn kind(&self) -> NotificationKind {
        self.code.kind()
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.code, self.code.summary(), self.detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(NotificationCode::RecipientNotFoundLocal.as_u16(), 1);
        assert_eq!(NotificationCode::InvalidFuzzycastQuota.as_u16(), 11);
    }

    #[test]
    fn test_informational_codes() {
        assert_eq!(
            NotificationCode::CapabilityForwardedToPeers.kind(),
            NotificationKind::Information
        );
        assert_eq!(
            NotificationCode::RemotePlatformUnknown.kind(),
            NotificationKind::Failure
        );
    }

    #[test]
    fn test_insufficient_candidates_carries_counts() {
        let n = Notification::insufficient_candidates(5, 3);
        assert_eq!(n.requested, Some(5));
        assert_eq!(n.available, Some(3));
        assert!(n.to_string().contains("only 3 available"));
    }
}
