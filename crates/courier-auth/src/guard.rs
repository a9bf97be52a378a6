//! The authorization guard.
//!
//! One method per operation kind. Each either returns what the operation
//! needs to proceed or the single [`AuthError`] that rejects it. The guard
//! reads users from the store but never writes.

use std::sync::{Arc, LazyLock};

use chrono::{TimeDelta, Utc};
use courier_protocol::PhoneNumber;
use courier_store::{Store, User};
use regex::Regex;

use crate::kdf::{SALT_LEN, constant_time_eq, generate_salt};
use crate::{AuthError, Claims, PasswordKdf, TokenSigner};

/// Accepted phone shape: two to four groups of 2-4 ASCII digits joined by dashes.
static PHONE_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{2,4}(-[0-9]{2,4}){1,3}$").expect("phone pattern compiles")
});

/// Default token lifetime in hours (20 days).
const DEFAULT_TOKEN_TTL_HOURS: i64 = 480;

/// A freshly derived password hash and the salt it was derived with.
#[derive(Debug, Clone)]
pub struct NewCredentials {
    pub password_hash: Vec<u8>,
    pub salt: Vec<u8>,
}

/// Enforces per-operation authorization rules.
pub struct Guard<S, T, K> {
    store: Arc<S>,
    signer: T,
    kdf: K,
    token_ttl: TimeDelta,
}

impl<S, T, K> Guard<S, T, K>
where
    S: Store,
    T: TokenSigner,
    K: PasswordKdf,
{
    pub fn new(store: Arc<S>, signer: T, kdf: K) -> Self {
        Self {
            store,
            signer,
            kdf,
            token_ttl: TimeDelta::hours(DEFAULT_TOKEN_TTL_HOURS),
        }
    }

    /// Sets how long issued tokens stay valid.
    pub fn with_token_ttl(mut self, ttl: TimeDelta) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn token_ttl(&self) -> TimeDelta {
        self.token_ttl
    }

    /// Verifies `token` and checks its expiry against the current time.
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Unauthenticated("missing token"));
        }
        let claims = self.signer.verify(token)?;
        if claims.is_expired_at(Utc::now()) {
            return Err(AuthError::Unauthenticated("token expired"));
        }
        Ok(claims)
    }

    /// Verifies `token` and checks that its subject is a stored user.
    async fn caller(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = self.verify_token(token)?;
        if self.store.find_user(&claims.subject()).await?.is_none() {
            return Err(AuthError::Unauthenticated("caller does not exist"));
        }
        Ok(claims)
    }

    /// Authorizes a direct message from `sender` to `receiver`.
    ///
    /// Argument checks run before the token is looked at, so an empty field
    /// or a message to oneself is `InvalidArgument` whatever the token.
    pub async fn authorize_send(
        &self,
        token: &str,
        sender: &PhoneNumber,
        receiver: &PhoneNumber,
        content: &str,
    ) -> Result<(), AuthError> {
        if sender.is_empty() || receiver.is_empty() || content.is_empty() {
            return Err(AuthError::InvalidArgument(
                "sender, receiver and content are required",
            ));
        }
        if sender == receiver {
            return Err(AuthError::InvalidArgument("cannot message yourself"));
        }

        let claims = self.verify_token(token)?;
        if claims.sub != sender.as_str() {
            tracing::warn!(subject = %claims.sub, %sender, "send as another user rejected");
            return Err(AuthError::Unauthenticated("token subject is not the sender"));
        }
        if self.store.find_user(sender).await?.is_none() {
            return Err(AuthError::Unauthenticated("sender does not exist"));
        }
        if self.store.find_user(receiver).await?.is_none() {
            return Err(AuthError::ReceiverMissing(receiver.clone()));
        }
        Ok(())
    }

    /// Authorizes reading the conversation between `user_a` and `user_b`,
    /// for both backfill and live subscription.
    pub async fn authorize_conversation(
        &self,
        token: &str,
        user_a: &PhoneNumber,
        user_b: &PhoneNumber,
    ) -> Result<Claims, AuthError> {
        if user_a.is_empty() || user_b.is_empty() {
            return Err(AuthError::InvalidArgument("both participants are required"));
        }
        if user_a == user_b {
            return Err(AuthError::InvalidArgument(
                "a conversation needs two distinct participants",
            ));
        }

        let claims = self.caller(token).await?;
        if claims.sub != user_a.as_str() && claims.sub != user_b.as_str() {
            tracing::warn!(subject = %claims.sub, %user_a, %user_b, "read of foreign conversation rejected");
            return Err(AuthError::Unauthenticated("caller is not a participant"));
        }
        Ok(claims)
    }

    /// Authorizes a profile lookup and returns the queried user.
    pub async fn authorize_user_info(
        &self,
        token: &str,
        phone: &PhoneNumber,
    ) -> Result<User, AuthError> {
        if phone.is_empty() {
            return Err(AuthError::InvalidArgument("phone is required"));
        }
        self.caller(token).await?;
        self.store
            .find_user(phone)
            .await?
            .ok_or_else(|| AuthError::NotFound(phone.clone()))
    }

    /// Validates a registration request. Needs no token.
    pub async fn check_registration(
        &self,
        username: &str,
        phone: &PhoneNumber,
        password: &str,
    ) -> Result<(), AuthError> {
        if username.is_empty() || phone.is_empty() || password.is_empty() {
            return Err(AuthError::InvalidArgument(
                "username, phone and password are required",
            ));
        }
        if !PHONE_SHAPE.is_match(phone.as_str()) {
            return Err(AuthError::InvalidArgument("malformed phone number"));
        }
        if self.store.find_user(phone).await?.is_some() {
            return Err(AuthError::AlreadyExists(phone.clone()));
        }
        Ok(())
    }

    /// Checks a phone/password pair and returns the matching user.
    ///
    /// Every failure is the same `Unauthenticated`. An unknown phone still
    /// costs one derivation so response time does not reveal whether the
    /// phone is registered.
    pub async fn check_login(&self, phone: &PhoneNumber, password: &str) -> Result<User, AuthError> {
        if phone.is_empty() || password.is_empty() {
            return Err(AuthError::InvalidArgument("phone and password are required"));
        }

        let Some(user) = self.store.find_user(phone).await? else {
            self.derive(password, vec![0u8; SALT_LEN]).await?;
            tracing::info!(%phone, "login for unknown phone rejected");
            return Err(AuthError::Unauthenticated("invalid credentials"));
        };

        let hash = self.derive(password, user.salt.clone()).await?;
        if !constant_time_eq(&hash, &user.password_hash) {
            tracing::info!(%phone, "login with wrong password rejected");
            return Err(AuthError::Unauthenticated("invalid credentials"));
        }
        Ok(user)
    }

    /// Derives a hash for a new password under a fresh salt.
    pub async fn new_credentials(&self, password: &str) -> Result<NewCredentials, AuthError> {
        let salt = generate_salt().to_vec();
        let password_hash = self.derive(password, salt.clone()).await?;
        Ok(NewCredentials {
            password_hash,
            salt,
        })
    }

    /// Issues a token for `user`, valid from now for the configured TTL.
    pub fn issue_token(&self, user: &User) -> Result<String, AuthError> {
        Ok(self
            .signer
            .issue(&user.phone, &user.username, Utc::now(), self.token_ttl)?)
    }

    /// Runs the KDF on the blocking pool.
    async fn derive(&self, password: &str, salt: Vec<u8>) -> Result<Vec<u8>, AuthError> {
        let kdf = self.kdf.clone();
        let password = password.to_owned();
        let hash =
            tokio::task::spawn_blocking(move || kdf.derive(password.as_bytes(), &salt)).await?;
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use courier_store::SqliteStore;

    use super::*;
    use crate::{JwtSigner, KdfParams, Pbkdf2Kdf};

    type TestGuard = Guard<SqliteStore, JwtSigner, Pbkdf2Kdf>;

    fn guard() -> TestGuard {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let signer = JwtSigner::new(b"guard-secret").unwrap();
        let kdf = Pbkdf2Kdf::new(KdfParams {
            iterations: 1_000,
            key_len: 32,
        });
        Guard::new(store, signer, kdf)
    }

    /// Stores a user with `password` and returns a fresh token for them.
    async fn register(guard: &TestGuard, phone: &str, name: &str, password: &str) -> String {
        let creds = guard.new_credentials(password).await.unwrap();
        let user = User {
            phone: phone.into(),
            username: name.into(),
            password_hash: creds.password_hash,
            salt: creds.salt,
        };
        guard.store.insert_user(user.clone()).await.unwrap();
        guard.issue_token(&user).unwrap()
    }

    fn expired_token(guard: &TestGuard, phone: &str) -> String {
        guard
            .signer
            .issue(
                &phone.into(),
                "Old",
                Utc::now() - TimeDelta::hours(2),
                TimeDelta::hours(1),
            )
            .unwrap()
    }

    // =======================================================================
    // Send
    // =======================================================================

    #[tokio::test]
    async fn test_authorize_send_valid_returns_ok() {
        let guard = guard();
        let alice = register(&guard, "111-111", "Alice", "pw1").await;
        register(&guard, "222-222", "Bob", "pw2").await;

        guard
            .authorize_send(&alice, &"111-111".into(), &"222-222".into(), "hi")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_authorize_send_to_self_with_bad_token_returns_invalid_argument() {
        let guard = guard();
        let result = guard
            .authorize_send("garbage", &"111-111".into(), &"111-111".into(), "hi")
            .await;
        assert!(matches!(result, Err(AuthError::InvalidArgument(_))), "got {result:?}");
    }

    #[tokio::test]
    async fn test_authorize_send_empty_content_returns_invalid_argument() {
        let guard = guard();
        let alice = register(&guard, "111-111", "Alice", "pw1").await;
        let result = guard
            .authorize_send(&alice, &"111-111".into(), &"222-222".into(), "")
            .await;
        assert!(matches!(result, Err(AuthError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_authorize_send_as_someone_else_returns_unauthenticated() {
        let guard = guard();
        let alice = register(&guard, "111-111", "Alice", "pw1").await;
        register(&guard, "222-222", "Bob", "pw2").await;

        let result = guard
            .authorize_send(&alice, &"222-222".into(), &"111-111".into(), "hi")
            .await;
        assert!(matches!(result, Err(AuthError::Unauthenticated(_))));
    }

    #[tokio::test]
    async fn test_authorize_send_expired_token_returns_unauthenticated() {
        let guard = guard();
        register(&guard, "111-111", "Alice", "pw1").await;
        register(&guard, "222-222", "Bob", "pw2").await;
        let token = expired_token(&guard, "111-111");

        let result = guard
            .authorize_send(&token, &"111-111".into(), &"222-222".into(), "hi")
            .await;
        assert!(matches!(result, Err(AuthError::Unauthenticated(_))));
    }

    #[tokio::test]
    async fn test_authorize_send_unknown_receiver_returns_receiver_missing() {
        let guard = guard();
        let alice = register(&guard, "111-111", "Alice", "pw1").await;

        let result = guard
            .authorize_send(&alice, &"111-111".into(), &"999-999".into(), "hi")
            .await;
        assert!(matches!(&result, Err(AuthError::ReceiverMissing(p)) if p.as_str() == "999-999"));
    }

    #[tokio::test]
    async fn test_authorize_send_unregistered_sender_returns_unauthenticated() {
        let guard = guard();
        register(&guard, "222-222", "Bob", "pw2").await;
        // Validly signed, but the user was never stored.
        let ghost = guard
            .signer
            .issue(&"111-111".into(), "Ghost", Utc::now(), TimeDelta::hours(1))
            .unwrap();

        let result = guard
            .authorize_send(&ghost, &"111-111".into(), &"222-222".into(), "hi")
            .await;
        assert!(matches!(result, Err(AuthError::Unauthenticated(_))));
    }

    // =======================================================================
    // Conversation reads
    // =======================================================================

    #[tokio::test]
    async fn test_authorize_conversation_participant_in_either_slot_returns_claims() {
        let guard = guard();
        let bob = register(&guard, "222-222", "Bob", "pw2").await;

        let first = guard
            .authorize_conversation(&bob, &"222-222".into(), &"111-111".into())
            .await
            .unwrap();
        let second = guard
            .authorize_conversation(&bob, &"111-111".into(), &"222-222".into())
            .await
            .unwrap();
        assert_eq!(first.sub, "222-222");
        assert_eq!(second.sub, "222-222");
    }

    #[tokio::test]
    async fn test_authorize_conversation_outsider_returns_unauthenticated() {
        let guard = guard();
        let carol = register(&guard, "333-333", "Carol", "pw3").await;

        let result = guard
            .authorize_conversation(&carol, &"111-111".into(), &"222-222".into())
            .await;
        assert!(matches!(result, Err(AuthError::Unauthenticated(_))));
    }

    #[tokio::test]
    async fn test_authorize_conversation_expired_token_returns_unauthenticated() {
        let guard = guard();
        register(&guard, "111-111", "Alice", "pw1").await;
        let token = expired_token(&guard, "111-111");

        let result = guard
            .authorize_conversation(&token, &"111-111".into(), &"222-222".into())
            .await;
        assert!(matches!(result, Err(AuthError::Unauthenticated(_))));
    }

    #[tokio::test]
    async fn test_authorize_conversation_same_user_twice_returns_invalid_argument() {
        let guard = guard();
        let alice = register(&guard, "111-111", "Alice", "pw1").await;

        let result = guard
            .authorize_conversation(&alice, &"111-111".into(), &"111-111".into())
            .await;
        assert!(matches!(result, Err(AuthError::InvalidArgument(_))));
    }

    // =======================================================================
    // User info
    // =======================================================================

    #[tokio::test]
    async fn test_authorize_user_info_known_user_returns_user() {
        let guard = guard();
        let alice = register(&guard, "111-111", "Alice", "pw1").await;
        register(&guard, "222-222", "Bob", "pw2").await;

        let bob = guard
            .authorize_user_info(&alice, &"222-222".into())
            .await
            .unwrap();
        assert_eq!(bob.username, "Bob");
    }

    #[tokio::test]
    async fn test_authorize_user_info_unknown_user_returns_not_found() {
        let guard = guard();
        let alice = register(&guard, "111-111", "Alice", "pw1").await;

        let result = guard.authorize_user_info(&alice, &"999-999".into()).await;
        assert!(matches!(result, Err(AuthError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_authorize_user_info_expired_token_returns_unauthenticated() {
        let guard = guard();
        register(&guard, "111-111", "Alice", "pw1").await;
        let token = expired_token(&guard, "111-111");

        let result = guard.authorize_user_info(&token, &"111-111".into()).await;
        assert!(matches!(result, Err(AuthError::Unauthenticated(_))));
    }

    // =======================================================================
    // Registration and login
    // =======================================================================

    #[tokio::test]
    async fn test_check_registration_phone_shapes() {
        let guard = guard();
        for ok in ["111-111", "12-34-56", "1234-5678-90-12"] {
            guard
                .check_registration("Alice", &ok.into(), "pw")
                .await
                .unwrap_or_else(|e| panic!("{ok} rejected: {e}"));
        }
        for bad in [
            "111111",
            "1-111",
            "111-11111",
            "abc-def",
            "11-22-33-44-55",
            "111-111 ",
            "١١١-١١١",
            "１１１-１１１",
        ] {
            let result = guard.check_registration("Alice", &bad.into(), "pw").await;
            assert!(
                matches!(result, Err(AuthError::InvalidArgument(_))),
                "{bad} accepted"
            );
        }
    }

    #[tokio::test]
    async fn test_check_registration_taken_phone_returns_already_exists() {
        let guard = guard();
        register(&guard, "111-111", "Alice", "pw1").await;

        let result = guard
            .check_registration("Mallory", &"111-111".into(), "pw")
            .await;
        assert!(matches!(result, Err(AuthError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_check_registration_empty_field_returns_invalid_argument() {
        let guard = guard();
        let result = guard.check_registration("", &"111-111".into(), "pw").await;
        assert!(matches!(result, Err(AuthError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_check_login_correct_password_returns_user() {
        let guard = guard();
        register(&guard, "111-111", "Alice", "pw1").await;

        let user = guard.check_login(&"111-111".into(), "pw1").await.unwrap();
        assert_eq!(user.username, "Alice");
    }

    #[tokio::test]
    async fn test_check_login_wrong_password_or_unknown_phone_returns_unauthenticated() {
        let guard = guard();
        register(&guard, "111-111", "Alice", "pw1").await;

        let wrong = guard.check_login(&"111-111".into(), "nope").await;
        let unknown = guard.check_login(&"999-999".into(), "pw1").await;
        assert!(matches!(wrong, Err(AuthError::Unauthenticated("invalid credentials"))));
        assert!(matches!(unknown, Err(AuthError::Unauthenticated("invalid credentials"))));
    }

    #[tokio::test]
    async fn test_issue_token_uses_configured_ttl() {
        let guard = guard().with_token_ttl(TimeDelta::minutes(5));
        let token = register(&guard, "111-111", "Alice", "pw1").await;

        let claims = guard.verify_token(&token).unwrap();
        assert_eq!(claims.exp - claims.iat, 300);
        assert_eq!(claims.username, "Alice");
    }

    #[test]
    fn test_verify_token_empty_returns_unauthenticated() {
        let result = guard().verify_token("");
        assert!(matches!(result, Err(AuthError::Unauthenticated(_))));
    }
}
