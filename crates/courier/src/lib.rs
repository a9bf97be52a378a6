//! # Courier
//!
//! Direct-messaging backend: users register, log in, exchange persisted
//! messages, and can hold a live stream of a conversation that receives
//! new messages the moment they are stored.
//!
//! The crate wires the layers together:
//!
//! ```text
//! courier-transport   WebSocket connections
//! courier-protocol    request / response / event frames
//! courier (this)      SessionCore operations, per-connection handler, server
//! courier-auth        Guard: tokens, ownership, credentials
//! courier-store       SQLite users and messages
//! courier-registry    live readers and fan-out
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use courier::prelude::*;
//!
//! # async fn run() -> Result<(), CourierError> {
//! let config = ServerConfig::from_env()?;
//! let store = Arc::new(SqliteStore::open(&config.db_path)?);
//! let signer = JwtSigner::new(config.secret_key.as_bytes()).map_err(AuthError::from)?;
//! let kdf = Pbkdf2Kdf::new(config.kdf);
//!
//! let server = CourierServer::builder()
//!     .config(config)
//!     .build(store, signer, kdf)
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
pub mod logging;
mod server;
mod session;

pub use config::{ConfigError, ServerConfig};
pub use error::CourierError;
pub use server::{CourierServer, CourierServerBuilder};
pub use session::{ConversationStream, SessionCore, StreamState, UserProfile};

/// Everything needed to assemble and run a server.
pub mod prelude {
    pub use courier_auth::{AuthError, JwtSigner, KdfParams, Pbkdf2Kdf};
    pub use courier_protocol::{
        EndReason, Envelope, Message, Payload, PhoneNumber, Request, Response, StatusCode,
        StreamEvent,
    };
    pub use courier_registry::{RegistryConfig, SubscribePolicy};
    pub use courier_store::SqliteStore;

    pub use crate::{
        ConversationStream, CourierError, CourierServer, CourierServerBuilder, ServerConfig,
        SessionCore, StreamState,
    };
}
