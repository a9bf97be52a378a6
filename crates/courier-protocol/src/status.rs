//! The status taxonomy every failed operation is reported in.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome category of a failed request.
///
/// Each internal error maps to exactly one of these. The wire carries only
/// the code and a fixed public message, never the internal cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    /// Malformed or empty input.
    InvalidArgument,
    /// Missing, invalid, or expired token, or a token whose subject is not
    /// entitled to the named resource. Also covers failed logins.
    Unauthenticated,
    /// Registration of an identity that already exists.
    AlreadyExists,
    /// A queried identity does not exist.
    NotFound,
    /// The operation is well-formed but a referenced identity (the receiver
    /// of a send) does not exist.
    FailedPrecondition,
    /// The service is shutting down or a dependency is unreachable.
    Unavailable,
    /// Anything else. Details go to the log, not the caller.
    Internal,
}

impl StatusCode {
    /// Returns the code's canonical name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "InvalidArgument",
            Self::Unauthenticated => "Unauthenticated",
            Self::AlreadyExists => "AlreadyExists",
            Self::NotFound => "NotFound",
            Self::FailedPrecondition => "FailedPrecondition",
            Self::Unavailable => "Unavailable",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
