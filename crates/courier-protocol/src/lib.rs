//! Wire protocol for Courier.
//!
//! This crate defines the vocabulary shared by every other layer:
//!
//! - **Identity and data types** ([`PhoneNumber`], [`Message`]).
//! - **RPC frames** ([`Envelope`], [`Request`], [`Response`],
//!   [`StreamEvent`]) that travel over the transport.
//! - **Status codes** ([`StatusCode`]), the single error taxonomy every
//!   failure is reported in.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) for frames to/from bytes.
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Session Core (operations)
//! ```

mod codec;
mod error;
mod status;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use status::StatusCode;
pub use types::{
    EndReason, Envelope, Message, Payload, PhoneNumber, Request, Response, StreamEvent,
};
