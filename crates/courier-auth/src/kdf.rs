//! Password hashing.

use rand::RngCore;
use sha2::Sha512;

/// Length of a freshly generated salt, in bytes.
pub const SALT_LEN: usize = 24;

/// Cost parameters for password derivation. Registration and login must
/// use the same values or stored hashes stop matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// PBKDF2 rounds.
    pub iterations: u32,
    /// Derived key length in bytes.
    pub key_len: usize,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: 210_000,
            key_len: 32,
        }
    }
}

/// Derives a password hash from a password and a salt.
///
/// Derivation is deliberately slow, so the guard runs it on the blocking
/// pool; implementations must be cheap to clone and movable across threads.
pub trait PasswordKdf: Clone + Send + Sync + 'static {
    /// Returns the derived key for `password` under `salt`.
    fn derive(&self, password: &[u8], salt: &[u8]) -> Vec<u8>;
}

/// PBKDF2 with HMAC-SHA512.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pbkdf2Kdf {
    params: KdfParams,
}

impl Pbkdf2Kdf {
    pub fn new(params: KdfParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> KdfParams {
        self.params
    }
}

impl PasswordKdf for Pbkdf2Kdf {
    fn derive(&self, password: &[u8], salt: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; self.params.key_len];
        pbkdf2::pbkdf2_hmac::<Sha512>(password, salt, self.params.iterations, &mut out);
        out
    }
}

/// Returns a new random salt from the thread-local CSPRNG.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    salt
}

/// Compares two byte strings without short-circuiting on the first
/// differing byte.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
