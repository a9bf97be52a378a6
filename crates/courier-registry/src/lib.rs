//! Live delivery for Courier.
//!
//! The registry maps each conversation to at most one live reader. A send
//! that has been persisted is offered to that reader through a bounded
//! channel; if nobody is listening, or the reader has fallen behind, the
//! offer is dropped and the reader catches up from history on its next
//! subscribe.
//!
//! # Key types
//!
//! - [`ConversationKey`]: canonical name for an unordered pair of users
//! - [`Registry`]: open, close, publish, shutdown
//! - [`Subscription`]: the reading end, released on drop
//! - [`RegistryConfig`] / [`SubscribePolicy`]: channel size and what a
//!   second subscriber does

mod config;
mod error;
mod key;
mod registry;

pub use config::{RegistryConfig, SubscribePolicy};
pub use error::{ParsePolicyError, RegistryError};
pub use key::ConversationKey;
pub use registry::{Registry, Subscription};
