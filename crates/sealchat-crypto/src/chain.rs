//! Symmetric chain ratchet for forward-secure message keys
//!
//! # Security Properties
//!
//! - Forward Secrecy: a chain key only yields the message keys at and after
//!   its own position, never the ones before it
//! - Key Uniqueness: each step produces a distinct message key
//! - Determinism: the same chain key always produces the same step

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::primitives::{KEY_SIZE, secret::Secret};

type HmacSha256 = Hmac<Sha256>;

/// Label for deriving the next chain key
const CHAIN_LABEL: &[u8] = b"sealchat-chain";

/// Label for deriving a message key
const MESSAGE_LABEL: &[u8] = b"sealchat-message";

/// Key for a single message. Used once for AEAD and then dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageKey(Secret<KEY_SIZE>);

impl MessageKey {
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        self.0.as_bytes()
    }
}

/// Current key of a sending or receiving chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainKey(Secret<KEY_SIZE>);

/// Output of one chain step.
#[derive(Debug)]
pub struct ChainStep {
    /// Key for the message at the current position
    pub message_key: MessageKey,
    /// Chain key for the next position
    pub next_chain_key: ChainKey,
}

impl ChainKey {
    /// Seed a chain from KDF output.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(Secret::from_bytes(bytes))
    }

    /// Derive the message key for this position and the next chain key.
    ///
    /// Pure: the receiver keeps `self` until it decides to commit the step.
    /// Callers replace their chain key with `next_chain_key` and must never
    /// advance the same chain key twice for two different messages.
    pub fn advance(&self) -> ChainStep {
        ChainStep {
            message_key: MessageKey(Secret::from_bytes(self.derive(MESSAGE_LABEL))),
            next_chain_key: ChainKey(Secret::from_bytes(self.derive(CHAIN_LABEL))),
        }
    }

    fn derive(&self, label: &[u8]) -> [u8; KEY_SIZE] {
        let Ok(mut mac) = HmacSha256::new_from_slice(self.0.as_bytes()) else {
            unreachable!("HMAC-SHA256 accepts any key size");
        };
        mac.update(label);
        let result = mac.finalize().into_bytes();

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&result);
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_seed() -> [u8; 32] {
        let mut seed = [0u8; 32];
        for (i, byte) in seed.iter_mut().enumerate() {
            *byte = i as u8;
        }
        seed
    }

    #[test]
    fn advance_produces_unique_keys() {
        let chain = ChainKey::from_bytes(test_seed());

        let step0 = chain.advance();
        let step1 = step0.next_chain_key.advance();
        let step2 = step1.next_chain_key.advance();

        assert_ne!(step0.message_key, step1.message_key, "keys must be unique");
        assert_ne!(step1.message_key, step2.message_key, "keys must be unique");
        assert_ne!(step0.message_key, step2.message_key, "keys must be unique");
    }

    #[test]
    fn message_key_differs_from_next_chain_key() {
        let step = ChainKey::from_bytes(test_seed()).advance();
        assert_ne!(step.message_key.as_bytes(), step.next_chain_key.0.as_bytes());
    }

    #[test]
    fn chain_is_deterministic() {
        let mut chain1 = ChainKey::from_bytes(test_seed());
        let mut chain2 = ChainKey::from_bytes(test_seed());

        for _ in 0..10 {
            let step1 = chain1.advance();
            let step2 = chain2.advance();
            assert_eq!(step1.message_key, step2.message_key, "same seed must produce same keys");
            chain1 = step1.next_chain_key;
            chain2 = step2.next_chain_key;
        }
    }

    #[test]
    fn advance_does_not_mutate() {
        let chain = ChainKey::from_bytes(test_seed());
        let first = chain.advance();
        let second = chain.advance();

        assert_eq!(first.message_key, second.message_key);
        assert_eq!(first.next_chain_key, second.next_chain_key);
    }

    #[test]
    fn different_seeds_produce_different_keys() {
        let mut seed1 = [0u8; 32];
        let mut seed2 = [0u8; 32];
        seed1[0] = 1;
        seed2[0] = 2;

        let key1 = ChainKey::from_bytes(seed1).advance().message_key;
        let key2 = ChainKey::from_bytes(seed2).advance().message_key;

        assert_ne!(key1, key2, "different seeds must produce different keys");
    }

    #[test]
    fn later_chain_key_never_reproduces_earlier_message_keys() {
        let mut chain = ChainKey::from_bytes(test_seed());
        let mut earlier = Vec::new();
        for _ in 0..5 {
            let step = chain.advance();
            earlier.push(step.message_key);
            chain = step.next_chain_key;
        }

        for _ in 0..20 {
            let step = chain.advance();
            assert!(!earlier.contains(&step.message_key));
            chain = step.next_chain_key;
        }
    }
}
