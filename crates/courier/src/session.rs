//! The session core: every Courier operation, transport-agnostic.
//!
//! Each operation runs the same pipeline:
//!
//! ```text
//! Guard (authorize) → Store (persist or read) → Registry (live fan-out)
//! ```
//!
//! Nothing reaches the store until the guard has admitted the caller, and
//! nothing is published until the store has committed it.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use courier_auth::{Guard, PasswordKdf, TokenSigner};
use courier_protocol::{Message, PhoneNumber};
use courier_registry::{ConversationKey, Registry, RegistryConfig, Subscription};
use courier_store::{Store, User};

use crate::CourierError;

/// The public part of a user's record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub username: String,
    pub phone: PhoneNumber,
}

/// Runs Courier's operations against a store, a guard and a registry.
pub struct SessionCore<S, T, K> {
    store: Arc<S>,
    guard: Guard<S, T, K>,
    registry: Registry,
}

impl<S, T, K> SessionCore<S, T, K>
where
    S: Store,
    T: TokenSigner,
    K: PasswordKdf,
{
    pub fn new(store: Arc<S>, signer: T, kdf: K) -> Self {
        Self {
            guard: Guard::new(Arc::clone(&store), signer, kdf),
            store,
            registry: Registry::default(),
        }
    }

    pub fn with_token_ttl(mut self, ttl: TimeDelta) -> Self {
        self.guard = self.guard.with_token_ttl(ttl);
        self
    }

    pub fn with_registry(mut self, config: RegistryConfig) -> Self {
        self.registry = Registry::new(config);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Creates an account and returns a token for it.
    pub async fn register(
        &self,
        username: &str,
        phone: &PhoneNumber,
        password: &str,
    ) -> Result<String, CourierError> {
        self.guard
            .check_registration(username, phone, password)
            .await?;
        let credentials = self.guard.new_credentials(password).await?;
        let user = User {
            phone: phone.clone(),
            username: username.to_owned(),
            password_hash: credentials.password_hash,
            salt: credentials.salt,
        };
        // Two racing registrations can both pass the check; the store's
        // primary key decides, and its Conflict maps to AlreadyExists.
        self.store.insert_user(user.clone()).await?;
        tracing::info!(%phone, "user registered");

        Ok(self.guard.issue_token(&user)?)
    }

    /// Exchanges a phone and password for a token.
    pub async fn login(&self, phone: &PhoneNumber, password: &str) -> Result<String, CourierError> {
        let user = self.guard.check_login(phone, password).await?;
        tracing::info!(%phone, "user logged in");
        Ok(self.guard.issue_token(&user)?)
    }

    /// Persists a message and offers it to the conversation's live reader.
    ///
    /// Success means the message is committed. Whether a live reader got
    /// it does not affect the result.
    pub async fn send_direct_message(
        &self,
        token: &str,
        sender: &PhoneNumber,
        receiver: &PhoneNumber,
        content: &str,
    ) -> Result<Message, CourierError> {
        self.guard
            .authorize_send(token, sender, receiver, content)
            .await?;

        // Stored at millisecond precision; truncate so the live copy and
        // the backfilled copy carry the same timestamp.
        let now = Utc::now().trunc_subsecs(3);
        let message = self
            .store
            .insert_message(sender, receiver, content, now)
            .await?;

        let key = ConversationKey::new(sender, receiver);
        let delivered = self.registry.publish(&key, message.clone());
        tracing::debug!(%key, id = message.id, delivered, "message sent");
        Ok(message)
    }

    /// Returns the conversation between `user_a` and `user_b` from `since`
    /// (inclusive; the beginning of time if absent), oldest first.
    pub async fn get_dms(
        &self,
        token: &str,
        user_a: &PhoneNumber,
        user_b: &PhoneNumber,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, CourierError> {
        self.guard
            .authorize_conversation(token, user_a, user_b)
            .await?;
        let messages = self
            .store
            .query_messages(user_a, user_b, since.unwrap_or(DateTime::UNIX_EPOCH))
            .await?;
        Ok(messages)
    }

    /// Opens a live stream of the conversation: history from `since`, then
    /// new messages as they are sent.
    ///
    /// The live subscription is installed before history is read, so a
    /// message committed in between shows up in one or the other; the
    /// stream drops the duplicate if it shows up in both.
    pub async fn subscribe(
        &self,
        token: &str,
        user_a: &PhoneNumber,
        user_b: &PhoneNumber,
        since: Option<DateTime<Utc>>,
    ) -> Result<ConversationStream, CourierError> {
        let key = ConversationKey::new(user_a, user_b);
        let mut stream = ConversationStream::new(key.clone());

        self.guard
            .authorize_conversation(token, user_a, user_b)
            .await?;

        let subscription = self.registry.open(key.clone())?;
        let backfill = self
            .store
            .query_messages(user_a, user_b, since.unwrap_or(DateTime::UNIX_EPOCH))
            .await?;
        tracing::info!(%key, backfill = backfill.len(), "subscribed");

        stream.begin(subscription, backfill);
        Ok(stream)
    }

    /// Looks up another user's public profile.
    pub async fn get_user_info(
        &self,
        token: &str,
        phone: &PhoneNumber,
    ) -> Result<UserProfile, CourierError> {
        let user = self.guard.authorize_user_info(token, phone).await?;
        Ok(UserProfile {
            username: user.username,
            phone: user.phone,
        })
    }

    /// Ends every live stream and refuses new subscriptions.
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }
}

// ---------------------------------------------------------------------------
// ConversationStream
// ---------------------------------------------------------------------------

/// Where a [`ConversationStream`] is in its life.
///
/// ```text
/// Authorizing → Backfilling → Live → Closing → Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Created, caller not yet admitted.
    Authorizing,
    /// Yielding stored history.
    Backfilling,
    /// Waiting on the live channel.
    Live,
    /// Releasing the subscription.
    Closing,
    /// Done; `next` returns `None`.
    Closed,
}

/// History followed by live messages for one conversation.
///
/// Dropping the stream releases its registry slot.
#[derive(Debug)]
pub struct ConversationStream {
    key: ConversationKey,
    state: StreamState,
    backfill: VecDeque<Message>,
    last_backfilled_id: Option<i64>,
    subscription: Option<Subscription>,
}

impl ConversationStream {
    fn new(key: ConversationKey) -> Self {
        Self {
            key,
            state: StreamState::Authorizing,
            backfill: VecDeque::new(),
            last_backfilled_id: None,
            subscription: None,
        }
    }

    fn begin(&mut self, subscription: Subscription, backfill: Vec<Message>) {
        self.last_backfilled_id = backfill.iter().map(|m| m.id).max();
        self.backfill = backfill.into();
        self.subscription = Some(subscription);
        self.state = StreamState::Backfilling;
    }

    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Returns the next message, or `None` once the stream has ended.
    ///
    /// While live this waits for a send. The live channel ends when the
    /// subscription is replaced, closed, or the registry shuts down.
    /// Cancel safe.
    pub async fn next(&mut self) -> Option<Message> {
        loop {
            match self.state {
                StreamState::Backfilling => match self.backfill.pop_front() {
                    Some(message) => return Some(message),
                    None => self.state = StreamState::Live,
                },
                StreamState::Live => {
                    let subscription = self.subscription.as_mut()?;
                    match subscription.recv().await {
                        Some(message) if self.already_backfilled(&message) => continue,
                        Some(message) => return Some(message),
                        None => {
                            tracing::debug!(key = %self.key, "live channel closed");
                            self.close();
                            return None;
                        }
                    }
                }
                StreamState::Authorizing | StreamState::Closing | StreamState::Closed => {
                    return None;
                }
            }
        }
    }

    /// Releases the subscription. Idempotent.
    pub fn close(&mut self) {
        if self.state == StreamState::Closed {
            return;
        }
        self.state = StreamState::Closing;
        self.backfill.clear();
        self.subscription = None;
        self.state = StreamState::Closed;
    }

    fn already_backfilled(&self, message: &Message) -> bool {
        self.last_backfilled_id.is_some_and(|last| message.id <= last)
    }
}
