//! Persistence for Courier.
//!
//! The rest of the system sees storage only through the four operations of
//! the [`Store`] trait. [`SqliteStore`] is the production implementation.
//!
//! ```text
//! Session Core / Guard (above)  ← read users, append and query messages
//!     ↕
//! Store (this crate)            ← durable record, authoritative for history
//! ```

mod error;
mod schema;
mod sqlite;

use std::future::Future;

use chrono::{DateTime, Utc};
use courier_protocol::{Message, PhoneNumber};

pub use error::StoreError;
pub use sqlite::SqliteStore;

/// A registered user as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub phone: PhoneNumber,
    pub username: String,
    pub password_hash: Vec<u8>,
    pub salt: Vec<u8>,
}

/// Durable storage for users and messages.
///
/// Implementations provide their own internal synchronization; callers
/// share one instance across all connection tasks.
pub trait Store: Send + Sync + 'static {
    /// Inserts a new user.
    ///
    /// # Errors
    /// [`StoreError::Conflict`] if the phone number is already registered.
    fn insert_user(&self, user: User) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Looks up a user by phone number.
    fn find_user(
        &self,
        phone: &PhoneNumber,
    ) -> impl Future<Output = Result<Option<User>, StoreError>> + Send;

    /// Appends a message and returns it with its assigned id.
    fn insert_message(
        &self,
        sender: &PhoneNumber,
        receiver: &PhoneNumber,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> impl Future<Output = Result<Message, StoreError>> + Send;

    /// Returns every message exchanged between `a` and `b` (either
    /// direction) with `timestamp >= since`, oldest first.
    fn query_messages(
        &self,
        a: &PhoneNumber,
        b: &PhoneNumber,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Message>, StoreError>> + Send;
}
