//! Error types for the registry.

use crate::ConversationKey;

/// Errors from opening a subscription.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The conversation already has a live reader and the policy is
    /// `Reject`.
    #[error("conversation {0} already has a live subscriber")]
    AlreadyExists(ConversationKey),

    /// The registry has been shut down.
    #[error("registry is shut down")]
    Unavailable,
}

/// An unrecognized subscribe policy name.
#[derive(Debug, thiserror::Error)]
#[error("unknown subscribe policy {0:?} (expected \"replace\" or \"reject\")")]
pub struct ParsePolicyError(pub String);
