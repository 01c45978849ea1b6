//! Chaos property tests for the conversation service
//!
//! The service runs over `ChaoticStore`, which fails storage calls at random.
//! Every transient failure is retried. Whatever the failure pattern:
//! - Each message is delivered exactly once, in send order
//! - A failed call leaves no trace (no half-committed ratchet state)
//! - Both sides end in a state that keeps working without chaos

use proptest::prelude::*;
use sealchat_crypto::SeededEnv;
use sealchat_server::{
    ChaoticStore, ConversationError, ConversationService, MemoryStore, ReceiveOutcome,
    SessionStore,
};

/// Run `op` until it succeeds, retrying transient failures only.
fn retry<T>(mut op: impl FnMut() -> Result<T, ConversationError>) -> T {
    for _ in 0..10_000 {
        match op() {
            Ok(value) => return value,
            Err(err) if err.is_transient() => {},
            Err(err) => panic!("Unexpected error: {err:?}"),
        }
    }
    panic!("operation kept failing");
}

fn texts(outcome: ReceiveOutcome) -> Vec<Vec<u8>> {
    assert!(outcome.stalled.is_none(), "stalled: {:?}", outcome.stalled);
    outcome.messages.into_iter().map(|m| m.plaintext).collect()
}

#[test]
fn prop_chaos_delivers_every_message_once() {
    proptest!(ProptestConfig::with_cases(64), |(
        failure_rate in 0.0..0.5,
        seed in any::<u64>(),
        ops in prop::collection::vec(0u8..4, 1..60),
    )| {
        let store = ChaoticStore::with_seed(MemoryStore::new(), failure_rate, seed);
        let service = ConversationService::new(store, SeededEnv::from_u64(seed));

        retry(|| service.register("alice"));
        retry(|| service.register("bob"));
        retry(|| service.open("alice", "bob", None));
        retry(|| service.open("bob", "alice", None));

        let mut to_bob = Vec::new();
        let mut to_alice = Vec::new();
        let mut bob_got = Vec::new();
        let mut alice_got = Vec::new();

        for (i, &op) in ops.iter().enumerate() {
            let payload = vec![op, i as u8];
            match op {
                0 => {
                    retry(|| service.send("alice", "bob", &payload));
                    to_bob.push(payload);
                },
                1 => {
                    retry(|| service.send("bob", "alice", &payload));
                    to_alice.push(payload);
                },
                2 => alice_got.extend(texts(retry(|| service.receive_pending("alice", "bob")))),
                _ => bob_got.extend(texts(retry(|| service.receive_pending("bob", "alice")))),
            }
        }

        // Drain without chaos.
        let calm = ConversationService::new(
            service.store().inner().clone(),
            SeededEnv::from_u64(seed ^ 1),
        );
        alice_got.extend(texts(calm.receive_pending("alice", "bob").unwrap()));
        bob_got.extend(texts(calm.receive_pending("bob", "alice").unwrap()));

        prop_assert_eq!(&bob_got, &to_bob);
        prop_assert_eq!(&alice_got, &to_alice);

        // The log holds exactly the successful sends.
        let total = calm.store().total_message_count().unwrap();
        prop_assert_eq!(total, to_bob.len() + to_alice.len());

        // And the conversation still works.
        calm.send("bob", "alice", b"still here").unwrap();
        prop_assert_eq!(texts(calm.receive_pending("alice", "bob").unwrap()), vec![
            b"still here".to_vec()
        ]);
    });
}

#[test]
fn prop_injected_failures_leave_store_untouched() {
    proptest!(|(seed in any::<u64>())| {
        let store = ChaoticStore::with_seed(MemoryStore::new(), 1.0, seed);
        let service = ConversationService::new(store, SeededEnv::from_u64(seed));

        let err = service.register("alice").unwrap_err();
        prop_assert!(err.is_transient());
        prop_assert!(service.store().inner().list_conversations("alice").unwrap().is_empty());
        prop_assert_eq!(service.store().inner().total_message_count().unwrap(), 0);
        prop_assert!(service.store().operation_count() >= 1);
    });
}
