//! Error types for the authorization layer.

use courier_protocol::PhoneNumber;
use courier_store::StoreError;

/// Why a token was rejected, or why one could not be issued.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Not a token at all, or missing required claims.
    #[error("malformed token")]
    Malformed,

    /// `exp` is in the past.
    #[error("token expired")]
    Expired,

    /// The signature does not match the server's secret.
    #[error("bad token signature")]
    BadSignature,

    /// The signing secret is unusable (empty).
    #[error("invalid signing secret: {0}")]
    InvalidSecret(&'static str),

    /// `issued_at + ttl` is not a representable time.
    #[error("token expiry out of range")]
    ExpiryOutOfRange,

    /// Encoding a new token failed.
    #[error("token encoding failed: {0}")]
    Encode(#[source] jsonwebtoken::errors::Error),
}

/// A rejected operation.
///
/// Variants line up with the status taxonomy; the server maps each to
/// exactly one wire status code.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Empty or malformed input.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Bad or expired token, a subject that may not act on the resource,
    /// or failed login. The reason is for logs only.
    #[error("unauthenticated: {0}")]
    Unauthenticated(&'static str),

    /// Registration for a phone number that is already taken.
    #[error("user {0} already exists")]
    AlreadyExists(PhoneNumber),

    /// The queried user does not exist.
    #[error("user {0} not found")]
    NotFound(PhoneNumber),

    /// The receiver of a send does not exist.
    #[error("receiver {0} does not exist")]
    ReceiverMissing(PhoneNumber),

    /// Issuing a token failed.
    #[error(transparent)]
    Token(TokenError),

    /// A user lookup failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The password hashing task panicked or was cancelled.
    #[error("password hashing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<TokenError> for AuthError {
    /// Verification failures are authentication failures; only issuance
    /// problems stay as `Token`.
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Malformed => Self::Unauthenticated("malformed token"),
            TokenError::Expired => Self::Unauthenticated("token expired"),
            TokenError::BadSignature => Self::Unauthenticated("bad token signature"),
            other => Self::Token(other),
        }
    }
}
