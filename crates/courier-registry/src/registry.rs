//! The conversation registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use courier_protocol::Message;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::{ConversationKey, RegistryConfig, RegistryError, SubscribePolicy};

/// The installed reader for one conversation.
struct Slot {
    /// Distinguishes this reader from earlier and later ones on the same key.
    generation: u64,
    sender: mpsc::Sender<Message>,
}

/// Everything behind the registry lock.
struct Slots {
    map: HashMap<ConversationKey, Slot>,
    next_generation: u64,
    shut_down: bool,
}

struct Inner {
    config: RegistryConfig,
    slots: Mutex<Slots>,
}

impl Inner {
    /// Locks the slot table. The table is never left half-updated, so a
    /// poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes `key` only if `generation` is still the installed reader.
    fn release(&self, key: &ConversationKey, generation: u64) {
        let mut slots = self.lock();
        if slots.map.get(key).is_some_and(|s| s.generation == generation) {
            slots.map.remove(key);
            tracing::debug!(%key, generation, "subscription released");
        }
    }
}

/// Maps each conversation to at most one live reader.
///
/// Cheap to clone; clones share the same table. The lock is a plain
/// `std::sync::Mutex` and is never held across an `.await`.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                slots: Mutex::new(Slots {
                    map: HashMap::new(),
                    next_generation: 1,
                    shut_down: false,
                }),
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Installs a new live reader for `key`.
    ///
    /// If a reader is already installed, the configured policy decides:
    /// `Replace` drops the old channel (its stream ends once drained),
    /// `Reject` fails with [`RegistryError::AlreadyExists`]. A leftover
    /// entry whose reader is already gone never counts as occupied.
    ///
    /// # Errors
    /// [`RegistryError::Unavailable`] after [`shutdown`](Self::shutdown).
    pub fn open(&self, key: ConversationKey) -> Result<Subscription, RegistryError> {
        let mut slots = self.inner.lock();
        if slots.shut_down {
            return Err(RegistryError::Unavailable);
        }

        if let Some(existing) = slots.map.get(&key) {
            if !existing.sender.is_closed() {
                match self.inner.config.policy {
                    SubscribePolicy::Reject => {
                        tracing::info!(%key, "second subscriber rejected");
                        return Err(RegistryError::AlreadyExists(key));
                    }
                    SubscribePolicy::Replace => {
                        tracing::info!(
                            %key,
                            replaced = existing.generation,
                            "live subscriber replaced"
                        );
                    }
                }
            }
        }

        let generation = slots.next_generation;
        slots.next_generation += 1;
        let (sender, receiver) = mpsc::channel(self.inner.config.capacity.max(1));
        slots.map.insert(key.clone(), Slot { generation, sender });
        drop(slots);

        tracing::debug!(%key, generation, "subscription opened");
        Ok(Subscription {
            key,
            generation,
            receiver,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Removes and closes the reader for `key`, whatever its generation.
    /// Returns `false` if there was none. Safe to call repeatedly.
    pub fn close(&self, key: &ConversationKey) -> bool {
        let removed = self.inner.lock().map.remove(key).is_some();
        if removed {
            tracing::debug!(%key, "subscription closed");
        }
        removed
    }

    /// Offers `message` to the live reader of `key` without waiting.
    ///
    /// Returns `true` if the message was queued. No reader, a full buffer,
    /// or a reader that has gone away all return `false`; the message is
    /// still in history either way.
    pub fn publish(&self, key: &ConversationKey, message: Message) -> bool {
        let sender = match self.inner.lock().map.get(key) {
            Some(slot) => slot.sender.clone(),
            None => {
                tracing::debug!(%key, id = message.id, "no live subscriber");
                return false;
            }
        };

        match sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                tracing::debug!(%key, id = message.id, "subscriber buffer full, live copy dropped");
                false
            }
            Err(TrySendError::Closed(message)) => {
                tracing::debug!(%key, id = message.id, "subscriber gone, live copy dropped");
                false
            }
        }
    }

    /// Closes every channel and refuses new subscriptions. Readers blocked
    /// in [`Subscription::recv`] wake with `None` once their buffers drain.
    pub fn shutdown(&self) {
        let drained: Vec<_> = {
            let mut slots = self.inner.lock();
            slots.shut_down = true;
            slots.map.drain().collect()
        };
        tracing::info!(closed = drained.len(), "registry shut down");
    }

    /// Returns `true` if `key` currently has a live reader.
    pub fn is_subscribed(&self, key: &ConversationKey) -> bool {
        self.inner.lock().map.contains_key(key)
    }

    /// Number of conversations with a live reader.
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

/// The reading end of a live conversation.
///
/// Dropping it releases the registry entry, unless a newer subscriber has
/// already taken the key over.
pub struct Subscription {
    key: ConversationKey,
    generation: u64,
    receiver: mpsc::Receiver<Message>,
    inner: Arc<Inner>,
}

impl Subscription {
    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Waits for the next live message. `None` means the channel was
    /// closed: by [`Registry::close`], by a replacing subscriber, or by
    /// shutdown. Cancel safe.
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.inner.release(&self.key, self.generation);
    }
}
