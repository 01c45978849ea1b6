//! Fault-injecting store wrapper
//!
//! Randomly fails storage calls so tests can check that a failed commit
//! never leaves a conversation in a state it can't recover from.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use sealchat_crypto::{KeyPair, SessionState};

use super::{ConversationSummary, SessionRecord, SessionStore, StoreError, StoredMessage};
use crate::id::ConversationId;

/// Store wrapper that fails calls with `StoreError::Io` at a fixed rate
///
/// A failed call never reaches the inner store, so an injected failure
/// behaves like a transaction that aborted before writing anything. The RNG
/// is seeded, which makes a chaos run reproducible.
#[derive(Clone)]
pub struct ChaoticStore<S: SessionStore> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    rng: Arc<Mutex<ChaoticRng>>,
    operations: Arc<AtomicUsize>,
    injected: Arc<AtomicUsize>,
}

/// Linear congruential generator, fast and deterministic.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // Numerical Recipes constants
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S: SessionStore> ChaoticStore<S> {
    /// Wrap `inner` with the default seed.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Wrap `inner` with an explicit seed.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng { state: seed })),
            operations: Arc::new(AtomicUsize::new(0)),
            injected: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Underlying store, for checking invariants after chaos.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of storage calls attempted.
    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::Relaxed)
    }

    /// Number of calls that were failed on purpose.
    pub fn injected_failures(&self) -> usize {
        self.injected.load(Ordering::Relaxed)
    }

    /// Count the call and decide whether it fails.
    fn inject(&self, operation: &'static str) -> Result<(), StoreError> {
        self.operations.fetch_add(1, Ordering::Relaxed);

        let roll = self.rng.lock().unwrap_or_else(PoisonError::into_inner).next();
        if roll < self.failure_rate {
            self.injected.fetch_add(1, Ordering::Relaxed);
            return Err(StoreError::Io(format!("chaotic failure injection ({operation})")));
        }

        Ok(())
    }
}

impl<S: SessionStore> SessionStore for ChaoticStore<S> {
    fn store_identity(&self, user: &str, identity: &KeyPair) -> Result<(), StoreError> {
        self.inject("store_identity")?;
        self.inner.store_identity(user, identity)
    }

    fn load_identity(&self, user: &str) -> Result<Option<KeyPair>, StoreError> {
        self.inject("load_identity")?;
        self.inner.load_identity(user)
    }

    fn create_session(
        &self,
        conversation: ConversationId,
        owner: &str,
        record: &SessionRecord,
    ) -> Result<(), StoreError> {
        self.inject("create_session")?;
        self.inner.create_session(conversation, owner, record)
    }

    fn load_session(
        &self,
        conversation: ConversationId,
        owner: &str,
    ) -> Result<Option<SessionRecord>, StoreError> {
        self.inject("load_session")?;
        self.inner.load_session(conversation, owner)
    }

    fn commit_send(
        &self,
        conversation: ConversationId,
        owner: &str,
        expected_version: u64,
        state: &SessionState,
        envelope: &[u8],
        sent_at: u64,
    ) -> Result<u64, StoreError> {
        self.inject("commit_send")?;
        self.inner.commit_send(conversation, owner, expected_version, state, envelope, sent_at)
    }

    fn commit_receive(
        &self,
        conversation: ConversationId,
        owner: &str,
        expected_version: u64,
        state: &SessionState,
        read_cursor: u64,
    ) -> Result<(), StoreError> {
        self.inject("commit_receive")?;
        self.inner.commit_receive(conversation, owner, expected_version, state, read_cursor)
    }

    fn load_messages(
        &self,
        conversation: ConversationId,
        from: u64,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        self.inject("load_messages")?;
        self.inner.load_messages(conversation, from, limit)
    }

    fn message_count(&self, conversation: ConversationId) -> Result<u64, StoreError> {
        self.inject("message_count")?;
        self.inner.message_count(conversation)
    }

    fn list_conversations(&self, owner: &str) -> Result<Vec<ConversationSummary>, StoreError> {
        self.inject("list_conversations")?;
        self.inner.list_conversations(owner)
    }
}

#[cfg(test)]
mod tests {
    use sealchat_crypto::SeededEnv;

    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn zero_rate_never_fails() {
        let env = SeededEnv::new([1; 32]);
        let chaotic = ChaoticStore::new(MemoryStore::new(), 0.0);

        for i in 0..100 {
            chaotic.store_identity(&format!("user{i}"), &KeyPair::generate(&env)).unwrap();
        }

        assert_eq!(chaotic.operation_count(), 100);
        assert_eq!(chaotic.injected_failures(), 0);
    }

    #[test]
    fn full_rate_always_fails_without_touching_inner() {
        let env = SeededEnv::new([2; 32]);
        let chaotic = ChaoticStore::new(MemoryStore::new(), 1.0);

        assert!(chaotic.store_identity("alice", &KeyPair::generate(&env)).is_err());
        assert!(chaotic.load_identity("alice").is_err());
        assert!(chaotic.list_conversations("alice").is_err());

        assert_eq!(chaotic.inner().load_identity("alice").unwrap(), None);
        assert_eq!(chaotic.injected_failures(), 3);
    }

    #[test]
    fn same_seed_same_failure_pattern() {
        let first = ChaoticStore::with_seed(MemoryStore::new(), 0.5, 42);
        let second = ChaoticStore::with_seed(MemoryStore::new(), 0.5, 42);

        for i in 0..100 {
            let a = first.load_identity("alice");
            let b = second.load_identity("alice");
            assert_eq!(a.is_ok(), b.is_ok(), "determinism violated at iteration {i}");
        }
        assert!(first.injected_failures() > 0);
    }

    #[test]
    fn injected_failures_are_transient() {
        let chaotic = ChaoticStore::new(MemoryStore::new(), 1.0);
        assert!(chaotic.message_count(ConversationId::from_u128(1)).unwrap_err().is_transient());
    }

    #[test]
    #[should_panic(expected = "failure_rate must be between 0.0 and 1.0")]
    fn rejects_invalid_failure_rate() {
        let _chaotic = ChaoticStore::new(MemoryStore::new(), 1.5);
    }
}
