//! Error types for the hub core.

use std::time::Duration;

/// Errors returned by registry and hub operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// The identity is already registered and the hub rejects duplicates.
    #[error("identity '{0}' is already registered")]
    DuplicateIdentity(String),
}

/// Outcome of a single failed delivery attempt during a broadcast.
///
/// Both variants lead to the recipient being evicted from the directory.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The recipient's transport reported an error.
    #[error("delivery to '{identity}' failed: {reason}")]
    Failed { identity: String, reason: String },

    /// The recipient did not accept the message within the delivery timeout.
    #[error("delivery to '{identity}' timed out after {after:?}")]
    Timeout { identity: String, after: Duration },
}

impl DeliveryError {
    pub fn failed(identity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            identity: identity.into(),
            reason: reason.into(),
        }
    }

    /// Identity of the recipient the delivery was addressed to.
    pub fn identity(&self) -> &str {
        match self {
            Self::Failed { identity, .. } | Self::Timeout { identity, .. } => identity,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
