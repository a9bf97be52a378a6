//! Error types for the store.

use courier_protocol::PhoneNumber;

/// Errors returned by a [`Store`](crate::Store).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A user with this phone number already exists.
    #[error("user {0} already exists")]
    Conflict(PhoneNumber),

    /// The database rejected or failed the statement.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The blocking task running the statement panicked or was cancelled.
    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A previous statement panicked while holding the connection.
    #[error("database connection poisoned")]
    Poisoned,
}
