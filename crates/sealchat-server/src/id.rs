//! Conversation identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Domain separator for conversation id hashing
const ID_LABEL: &[u8] = b"sealchat-conversation-v1";

/// Identifier of a two-party conversation.
///
/// Derived from the two participant handles so both sides find the same
/// conversation without a lookup table: `between(a, b) == between(b, a)`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConversationId(u128);

impl ConversationId {
    /// Conversation id for the pair `(a, b)`, independent of argument order.
    pub fn between(a: &str, b: &str) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };

        let mut hasher = Sha256::new();
        hasher.update(ID_LABEL);
        hasher.update((first.len() as u64).to_be_bytes());
        hasher.update(first.as_bytes());
        hasher.update((second.len() as u64).to_be_bytes());
        hasher.update(second.as_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Self(u128::from_be_bytes(bytes))
    }

    /// Wrap a raw id (as read back from storage).
    pub fn from_u128(raw: u128) -> Self {
        Self(raw)
    }

    /// Raw id value.
    pub fn as_u128(self) -> u128 {
        self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Debug for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConversationId({self})")
    }
}
