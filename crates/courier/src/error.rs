//! Unified error type for Courier.

use courier_auth::AuthError;
use courier_protocol::{ProtocolError, StatusCode};
use courier_registry::RegistryError;
use courier_store::StoreError;
use courier_transport::TransportError;

use crate::config::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// Each variant maps to exactly one [`StatusCode`] via
/// [`status`](Self::status). What a client sees is
/// [`public_message`](Self::public_message); the `Display` text, which may
/// name users or database causes, is for logs.
#[derive(Debug, thiserror::Error)]
pub enum CourierError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The request did not finish within the server's deadline.
    #[error("request timed out")]
    Timeout,
}

impl CourierError {
    /// The status code reported to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Auth(e) => match e {
                AuthError::InvalidArgument(_) => StatusCode::InvalidArgument,
                AuthError::Unauthenticated(_) => StatusCode::Unauthenticated,
                AuthError::AlreadyExists(_) => StatusCode::AlreadyExists,
                AuthError::NotFound(_) => StatusCode::NotFound,
                AuthError::ReceiverMissing(_) => StatusCode::FailedPrecondition,
                AuthError::Store(StoreError::Conflict(_)) => StatusCode::AlreadyExists,
                AuthError::Store(_) | AuthError::Token(_) | AuthError::Task(_) => {
                    StatusCode::Internal
                }
            },
            Self::Store(StoreError::Conflict(_)) => StatusCode::AlreadyExists,
            Self::Store(_) => StatusCode::Internal,
            Self::Registry(RegistryError::AlreadyExists(_)) => StatusCode::AlreadyExists,
            Self::Registry(RegistryError::Unavailable) => StatusCode::Unavailable,
            Self::Protocol(ProtocolError::InvalidMessage(_)) => StatusCode::InvalidArgument,
            Self::Protocol(ProtocolError::Decode(_)) => StatusCode::InvalidArgument,
            Self::Protocol(ProtocolError::Encode(_)) => StatusCode::Internal,
            Self::Transport(_) | Self::Timeout => StatusCode::Unavailable,
            Self::Config(_) => StatusCode::Internal,
        }
    }

    /// A client-safe description: fixed text per code, plus the input
    /// problem for `InvalidArgument`.
    pub fn public_message(&self) -> String {
        match self {
            Self::Auth(AuthError::InvalidArgument(reason)) => (*reason).to_owned(),
            Self::Auth(AuthError::Unauthenticated(reason @ "invalid credentials")) => {
                (*reason).to_owned()
            }
            Self::Protocol(ProtocolError::InvalidMessage(_) | ProtocolError::Decode(_)) => {
                "malformed request".to_owned()
            }
            Self::Registry(RegistryError::AlreadyExists(_)) => {
                "conversation already has a live subscriber".to_owned()
            }
            Self::Timeout => "request timed out".to_owned(),
            other => match other.status() {
                StatusCode::InvalidArgument => "invalid argument",
                StatusCode::Unauthenticated => "unauthenticated",
                StatusCode::AlreadyExists => "user already exists",
                StatusCode::NotFound => "user not found",
                StatusCode::FailedPrecondition => "receiver does not exist",
                StatusCode::Unavailable => "service unavailable",
                StatusCode::Internal => "internal error",
            }
            .to_owned(),
        }
    }
}
