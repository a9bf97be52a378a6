//! Registry configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ParsePolicyError;

/// What happens when a conversation that already has a live reader is
/// subscribed to again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscribePolicy {
    /// The newcomer takes over; the previous reader's stream ends.
    #[default]
    Replace,
    /// The newcomer is refused with `AlreadyExists`.
    Reject,
}

impl fmt::Display for SubscribePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replace => f.write_str("replace"),
            Self::Reject => f.write_str("reject"),
        }
    }
}

impl FromStr for SubscribePolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "reject" => Ok(Self::Reject),
            _ => Err(ParsePolicyError(s.to_owned())),
        }
    }
}

/// Settings for a [`Registry`](crate::Registry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Messages buffered per live reader before publishes start dropping.
    pub capacity: usize,

    /// Second-subscriber behavior.
    pub policy: SubscribePolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            capacity: 32,
            policy: SubscribePolicy::Replace,
        }
    }
}

impl RegistryConfig {
    /// Sets the per-reader buffer size. Values below 1 are raised to 1.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_policy(mut self, policy: SubscribePolicy) -> Self {
        self.policy = policy;
        self
    }
}
