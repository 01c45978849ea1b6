//! Fuzz target for two-party ratchet conversations
//!
//! # Strategy
//!
//! - Arbitrary interleaving of sends and receives on both sides
//! - Delivery lags behind sending by an arbitrary amount
//! - Tampered, replayed and truncated envelopes injected between real ones
//!
//! # Invariants
//!
//! - Honest envelopes always decrypt, in send order, to what was sent
//! - Every attack is rejected
//! - A rejected envelope leaves the receiver's state untouched

#![no_main]

use std::collections::VecDeque;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sealchat_crypto::{
    EncryptedEnvelope, KeyPair, Role, SeededEnv, SessionState, initialize_session,
};

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    seed: u64,
    operations: Vec<Operation>,
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Side {
    Alice,
    Bob,
}

#[derive(Debug, Clone, Arbitrary)]
enum Operation {
    /// Encrypt a message and queue it for the other side
    Send { from: Side, plaintext: Vec<u8> },
    /// Deliver the oldest queued message
    Deliver { to: Side },
    /// Deliver the oldest queued message with one bit flipped
    Tamper { to: Side, byte: u16, bit: u8 },
    /// Deliver the most recently delivered message again
    Replay { to: Side },
    /// Deliver the oldest queued message cut short
    Truncate { to: Side, keep: u16 },
}

struct Party {
    state: SessionState,
    /// Wire bytes and plaintext waiting to be delivered to this party
    inbox: VecDeque<(Vec<u8>, Vec<u8>)>,
    last_delivered: Option<Vec<u8>>,
}

impl Party {
    /// Deliver `wire` and require that it is rejected without a state change.
    fn reject(&mut self, env: &SeededEnv, wire: &[u8]) {
        let before = self.state.clone();
        let result = EncryptedEnvelope::decode(wire)
            .map_err(Into::into)
            .and_then(|envelope| self.state.decrypt(env, &envelope));
        assert!(result.is_err(), "attack envelope was accepted");
        assert_eq!(self.state, before);
    }
}

fuzz_target!(|scenario: Scenario| {
    let env = SeededEnv::from_u64(scenario.seed);
    let alice_id = KeyPair::generate(&env);
    let bob_id = KeyPair::generate(&env);

    let Ok(alice) = initialize_session(&env, alice_id.private(), &bob_id.public(), Role::Initiator)
    else {
        return;
    };
    let Ok(bob) = initialize_session(&env, bob_id.private(), &alice_id.public(), Role::Responder)
    else {
        return;
    };

    let mut parties = [
        Party { state: alice, inbox: VecDeque::new(), last_delivered: None },
        Party { state: bob, inbox: VecDeque::new(), last_delivered: None },
    ];

    for operation in scenario.operations.into_iter().take(256) {
        match operation {
            Operation::Send { from, plaintext } => {
                let (sender, receiver) = match from {
                    Side::Alice => (0, 1),
                    Side::Bob => (1, 0),
                };
                let (envelope, next) =
                    parties[sender].state.encrypt(&env, &plaintext).expect("encrypt failed");
                parties[sender].state = next;

                let wire = envelope.encode().expect("encode failed");
                parties[receiver].inbox.push_back((wire, plaintext));
            },
            Operation::Deliver { to } => {
                let party = &mut parties[to as usize];
                let Some((wire, expected)) = party.inbox.pop_front() else {
                    continue;
                };

                let envelope = EncryptedEnvelope::decode(&wire).expect("honest envelope decodes");
                let (plaintext, next) =
                    party.state.decrypt(&env, &envelope).expect("honest envelope decrypts");
                assert_eq!(plaintext, expected);

                party.state = next;
                party.last_delivered = Some(wire);
            },
            Operation::Tamper { to, byte, bit } => {
                let party = &mut parties[to as usize];
                let Some((wire, _)) = party.inbox.front() else {
                    continue;
                };

                let mut tampered = wire.clone();
                let index = byte as usize % tampered.len();
                tampered[index] ^= 1 << (bit % 8);

                // Bits in the reserved header bytes are not covered by anything.
                if matches!(index, 5..=7 | 28..=31) {
                    continue;
                }
                party.reject(&env, &tampered);
            },
            Operation::Replay { to } => {
                let party = &mut parties[to as usize];
                let Some(wire) = party.last_delivered.clone() else {
                    continue;
                };
                party.reject(&env, &wire);
            },
            Operation::Truncate { to, keep } => {
                let party = &mut parties[to as usize];
                let Some((wire, _)) = party.inbox.front() else {
                    continue;
                };

                let keep = keep as usize % wire.len();
                let truncated = wire[..keep].to_vec();
                party.reject(&env, &truncated);
            },
        }
    }
});
