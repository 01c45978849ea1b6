//! End-to-end conversation scenarios between two peers.
//!
//! Every state is persisted as CBOR and every envelope goes through the wire
//! codec between operations, the way a caller storing state would drive the
//! engine.

use sealchat_crypto::{
    EncryptedEnvelope, KeyPair, RatchetError, Role, SeededEnv, SessionState, initialize_session,
};

struct Peer {
    state: Vec<u8>,
}

impl Peer {
    fn new(state: &SessionState) -> Self {
        Self { state: state.to_cbor().unwrap() }
    }

    fn load(&self) -> SessionState {
        SessionState::from_cbor(&self.state).unwrap()
    }

    fn send(&mut self, env: &SeededEnv, plaintext: &[u8]) -> Vec<u8> {
        let (envelope, next) = self.load().encrypt(env, plaintext).unwrap();
        self.state = next.to_cbor().unwrap();
        envelope.encode().unwrap()
    }

    fn receive(&mut self, env: &SeededEnv, wire: &[u8]) -> Result<Vec<u8>, RatchetError> {
        let envelope = EncryptedEnvelope::decode(wire)?;
        let (plaintext, next) = self.load().decrypt(env, &envelope)?;
        self.state = next.to_cbor().unwrap();
        Ok(plaintext)
    }
}

fn alice_and_bob(env: &SeededEnv) -> (Peer, Peer) {
    let alice_id = KeyPair::generate(env);
    let bob_id = KeyPair::generate(env);

    let alice =
        initialize_session(env, alice_id.private(), &bob_id.public(), Role::Initiator).unwrap();
    let bob =
        initialize_session(env, bob_id.private(), &alice_id.public(), Role::Responder).unwrap();
    (Peer::new(&alice), Peer::new(&bob))
}

#[test]
fn hello_world() {
    let env = SeededEnv::new([0x11; 32]);
    let (alice, bob) = {
        let alice_id = KeyPair::generate(&env);
        let bob_id = KeyPair::generate(&env);
        (
            initialize_session(&env, alice_id.private(), &bob_id.public(), Role::Initiator)
                .unwrap(),
            initialize_session(&env, bob_id.private(), &alice_id.public(), Role::Responder)
                .unwrap(),
        )
    };

    let (hello, alice) = alice.encrypt(&env, b"hello").unwrap();
    assert_eq!(hello.chain_position, 0);

    let (plaintext, bob_after_hello) = bob.decrypt(&env, &hello).unwrap();
    assert_eq!(plaintext, b"hello");

    let (world, _) = alice.encrypt(&env, b"world").unwrap();
    assert_eq!(world.chain_position, 1);

    let (plaintext, bob_after_world) = bob_after_hello.decrypt(&env, &world).unwrap();
    assert_eq!(plaintext, b"world");

    assert_ne!(bob.receiving_chain(), bob_after_hello.receiving_chain());
    assert_ne!(bob_after_hello.receiving_chain(), bob_after_world.receiving_chain());
}

#[test]
fn long_conversation_through_persistence_and_wire() {
    let env = SeededEnv::new([0x22; 32]);
    let (mut alice, mut bob) = alice_and_bob(&env);

    for round in 0..10u8 {
        for burst in 0..=round % 3 {
            let text = format!("alice {round}.{burst}");
            let wire = alice.send(&env, text.as_bytes());
            assert_eq!(bob.receive(&env, &wire).unwrap(), text.as_bytes());
        }

        for burst in 0..=(round + 1) % 3 {
            let text = format!("bob {round}.{burst}");
            let wire = bob.send(&env, text.as_bytes());
            assert_eq!(alice.receive(&env, &wire).unwrap(), text.as_bytes());
        }
    }

    let alice_state = alice.load();
    let bob_state = bob.load();
    assert!(alice_state.root_epoch() >= 10);
    assert!(bob_state.root_epoch() >= 10);
}

#[test]
fn responder_may_speak_first() {
    let env = SeededEnv::new([0x33; 32]);
    let (mut alice, mut bob) = alice_and_bob(&env);

    let wire = bob.send(&env, b"are you there?");
    assert_eq!(alice.receive(&env, &wire).unwrap(), b"are you there?");

    let wire = alice.send(&env, b"yes");
    assert_eq!(bob.receive(&env, &wire).unwrap(), b"yes");

    let wire = bob.send(&env, b"good");
    assert_eq!(alice.receive(&env, &wire).unwrap(), b"good");
}

#[test]
fn every_reply_rekeys_the_root() {
    let env = SeededEnv::new([0x44; 32]);
    let (mut alice, mut bob) = alice_and_bob(&env);

    let wire = alice.send(&env, b"one");
    bob.receive(&env, &wire).unwrap();

    let before = alice.load();
    let wire = bob.send(&env, b"two");
    alice.receive(&env, &wire).unwrap();
    let after = alice.load();

    assert_ne!(before.root_key(), after.root_key());
    assert_ne!(before.sending_chain(), after.sending_chain());
    assert_ne!(before.receiving_chain(), after.receiving_chain());
    assert_ne!(before.ratchet_public(), after.ratchet_public());
}

#[test]
fn old_chain_messages_are_rejected_after_step() {
    let env = SeededEnv::new([0x55; 32]);
    let (mut alice, mut bob) = alice_and_bob(&env);

    let first = alice.send(&env, b"first");
    let late = alice.send(&env, b"late");
    bob.receive(&env, &first).unwrap();

    let reply = bob.send(&env, b"reply");
    alice.receive(&env, &reply).unwrap();
    let rekeyed = alice.send(&env, b"rekeyed");
    bob.receive(&env, &rekeyed).unwrap();

    // `late` was sealed on the bootstrap chain bob has since left.
    let bob_before = bob.state.clone();
    assert!(matches!(bob.receive(&env, &late), Err(RatchetError::EpochMismatch { .. })));
    assert_eq!(bob.state, bob_before);
}

#[test]
fn replayed_wire_bytes_are_rejected() {
    let env = SeededEnv::new([0x66; 32]);
    let (mut alice, mut bob) = alice_and_bob(&env);

    let wire = alice.send(&env, b"once");
    bob.receive(&env, &wire).unwrap();

    let result = bob.receive(&env, &wire);
    assert_eq!(result, Err(RatchetError::OutOfOrderMessage { expected: 1, actual: 0 }));
}

#[test]
fn corrupt_wire_bytes_surface_codec_errors() {
    let env = SeededEnv::new([0x77; 32]);
    let (mut alice, mut bob) = alice_and_bob(&env);

    let mut wire = alice.send(&env, b"payload");
    wire.truncate(40);

    let result = bob.receive(&env, &wire);
    assert!(matches!(result, Err(RatchetError::Codec(_))));
    assert!(result.unwrap_err().is_fatal());
}
