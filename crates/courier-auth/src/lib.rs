//! Authorization for Courier.
//!
//! Every operation passes through the [`Guard`] before it touches storage
//! or the live registry. The guard depends on two pluggable capabilities:
//!
//! 1. **Tokens**: [`TokenSigner`] issues and verifies bearer tokens.
//!    [`JwtSigner`] is the HS256 implementation.
//! 2. **Password hashing**: [`PasswordKdf`] derives a hash from a password
//!    and a per-user salt. [`Pbkdf2Kdf`] is the PBKDF2-HMAC-SHA512
//!    implementation.
//!
//! # How it fits in the stack
//!
//! ```text
//! Session Core (above)  ← asks the guard before every operation
//!     ↕
//! Guard (this crate)    ← token checks, ownership, existence, credentials
//!     ↕
//! Store (below)         ← read-only user lookups
//! ```

mod error;
mod guard;
mod kdf;
mod token;

pub use error::{AuthError, TokenError};
pub use guard::{Guard, NewCredentials};
pub use kdf::{KdfParams, PasswordKdf, Pbkdf2Kdf, SALT_LEN, constant_time_eq, generate_salt};
pub use token::{Claims, JwtSigner, TokenSigner};
