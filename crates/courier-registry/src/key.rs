//! Canonical conversation keys.

use std::fmt;

use courier_protocol::PhoneNumber;

/// Identifies the conversation between two users regardless of who is
/// named first: `ConversationKey::new(a, b) == ConversationKey::new(b, a)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConversationKey {
    low: PhoneNumber,
    high: PhoneNumber,
}

impl ConversationKey {
    pub fn new(a: &PhoneNumber, b: &PhoneNumber) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self {
            low: low.clone(),
            high: high.clone(),
        }
    }

    /// The two participants, in canonical order.
    pub fn participants(&self) -> (&PhoneNumber, &PhoneNumber) {
        (&self.low, &self.high)
    }

    /// Returns `true` if `phone` is one of the two participants.
    pub fn involves(&self, phone: &PhoneNumber) -> bool {
        &self.low == phone || &self.high == phone
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.low, self.high)
    }
}
