//! Bearer tokens.
//!
//! A token binds a caller to an identity (`sub`) until `exp`. The server
//! signs tokens with one process-wide secret; anything it did not sign, or
//! signed too long ago, is rejected.

use chrono::{DateTime, TimeDelta, Utc};
use courier_protocol::PhoneNumber;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::TokenError;

/// The claims carried by a token. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// The identity the token was issued to.
    pub sub: String,
    /// Display name at the time of issue.
    pub username: String,
    /// Issued-at, Unix seconds.
    pub iat: i64,
    /// Expiry, Unix seconds.
    pub exp: i64,
}

impl Claims {
    /// The subject as an identity.
    pub fn subject(&self) -> PhoneNumber {
        PhoneNumber::new(self.sub.as_str())
    }

    /// Returns `true` if the token is no longer valid at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp <= now.timestamp()
    }
}

/// Issues and verifies bearer tokens.
pub trait TokenSigner: Send + Sync + 'static {
    /// Signs a token for `subject`, valid from `issued_at` for `ttl`.
    fn issue(
        &self,
        subject: &PhoneNumber,
        username: &str,
        issued_at: DateTime<Utc>,
        ttl: TimeDelta,
    ) -> Result<String, TokenError>;

    /// Checks the signature and expiry of `token` and returns its claims.
    fn verify(&self, token: &str) -> Result<Claims, TokenError>;
}

/// HMAC-SHA256 JSON Web Tokens.
pub struct JwtSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtSigner {
    /// Creates a signer from a shared secret.
    ///
    /// # Errors
    /// [`TokenError::InvalidSecret`] if `secret` is empty.
    pub fn new(secret: &[u8]) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::InvalidSecret("secret must not be empty"));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        })
    }
}

impl std::fmt::Debug for JwtSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSigner").finish_non_exhaustive()
    }
}

impl TokenSigner for JwtSigner {
    fn issue(
        &self,
        subject: &PhoneNumber,
        username: &str,
        issued_at: DateTime<Utc>,
        ttl: TimeDelta,
    ) -> Result<String, TokenError> {
        let expires_at = issued_at
            .checked_add_signed(ttl)
            .ok_or(TokenError::ExpiryOutOfRange)?;
        let claims = Claims {
            sub: subject.as_str().to_owned(),
            username: username.to_owned(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(TokenError::Encode)
    }

    fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::BadSignature,
                _ => TokenError::Malformed,
            })?;
        Ok(data.claims)
    }
}
