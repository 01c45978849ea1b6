//! Session ratchet state machine.
//!
//! A [`SessionState`] holds everything one side of a conversation needs: the
//! root key, one sending and one receiving chain, the local ratchet key pair
//! and the last ratchet key seen from the peer. Every operation borrows the
//! state and returns a successor; the input state is never modified.
//!
//! # Epochs
//!
//! Each root derivation increments `root_epoch`. A chain remembers the epoch
//! of the root derivation that produced it and the sender stamps that epoch
//! into every envelope. The receiver uses it to tell apart:
//!
//! - a message on the chain it is already receiving (same ratchet key, same
//!   epoch)
//! - the peer's first message on the bootstrap chain (epoch 0, no peer key
//!   adopted yet)
//! - a message after the peer stepped its ratchet (new ratchet key, epoch
//!   exactly one past our root epoch)
//!
//! Anything else is a message from a chain this session has already left or
//! never reached, and is rejected without touching the state.

use serde::{Deserialize, Serialize};

use crate::{
    chain::ChainKey,
    env::Environment,
    envelope::{EncryptedEnvelope, KeyMaterial, build_nonce, header_aad},
    error::{CodecError, RatchetError},
    primitives::{
        KEY_SIZE, KeyPair, PublicKey, aead_encrypt, aead_open, diffie_hellman, kdf,
        secret::Secret,
    },
};

/// KDF context for root key derivations.
pub(crate) const ROOT_CONTEXT: &str = "root";

/// KDF context for chain keys derived during a ratchet step.
pub(crate) const CHAIN_CONTEXT: &str = "chain";

/// Which side opened the conversation. Fixed at bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Sends first on the bootstrap "send" chain
    Initiator,
    /// Sends on the bootstrap "recv" chain and performs the first DH step
    Responder,
}

/// Root of the key hierarchy. Only ratchet steps replace it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RootKey(Secret<KEY_SIZE>);

impl RootKey {
    pub(crate) fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(Secret::from_bytes(bytes))
    }

    /// Derive the next root key and a fresh chain key from a DH output.
    fn derive(&self, dh_output: &[u8; KEY_SIZE]) -> (RootKey, ChainKey) {
        let salt = self.0.as_bytes().as_slice();
        let root = kdf(dh_output, ROOT_CONTEXT, Some(salt));
        let chain = kdf(dh_output, CHAIN_CONTEXT, Some(salt));
        (RootKey::from_bytes(*root), ChainKey::from_bytes(*chain))
    }
}

/// Ratchet state of one side of a conversation.
///
/// # Invariants
///
/// - `send_message_number` is the position of the next outgoing message and
///   only grows within a sending chain
/// - `receive_message_number` is the next position expected on the receiving
///   chain
/// - `sending_epoch` and `receiving_epoch` never exceed `root_epoch`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    role: Role,
    root_key: RootKey,
    root_epoch: u64,
    sending_chain: ChainKey,
    sending_epoch: u64,
    receiving_chain: ChainKey,
    receiving_epoch: u64,
    self_ratchet: KeyPair,
    peer_ratchet_public: Option<PublicKey>,
    send_message_number: u64,
    receive_message_number: u64,
}

impl SessionState {
    /// Fresh state at epoch 0 with both counters at zero.
    pub(crate) fn new(
        role: Role,
        root_key: RootKey,
        sending_chain: ChainKey,
        receiving_chain: ChainKey,
        self_ratchet: KeyPair,
    ) -> Self {
        Self {
            role,
            root_key,
            root_epoch: 0,
            sending_chain,
            sending_epoch: 0,
            receiving_chain,
            receiving_epoch: 0,
            self_ratchet,
            peer_ratchet_public: None,
            send_message_number: 0,
            receive_message_number: 0,
        }
    }

    /// Encrypt `plaintext` on the sending chain.
    ///
    /// Returns the envelope and the successor state, which has the sending
    /// chain advanced by one and `send_message_number` incremented. Nothing
    /// else changes.
    ///
    /// # Errors
    ///
    /// - `CounterOverflow` if the sending chain is exhausted
    pub fn encrypt(
        &self,
        env: &impl Environment,
        plaintext: &[u8],
    ) -> Result<(EncryptedEnvelope, SessionState), RatchetError> {
        let position = self.send_message_number;
        let next_position = position
            .checked_add(1)
            .ok_or(RatchetError::CounterOverflow { current: position })?;

        let step = self.sending_chain.advance();
        let key_material =
            KeyMaterial { ratchet_key: self.self_ratchet.public(), epoch: self.sending_epoch };

        let nonce = build_nonce(key_material.epoch, position, env.random_array());
        let aad = header_aad(&key_material, position);
        let ciphertext = aead_encrypt(step.message_key.as_bytes(), &nonce, &aad, plaintext);

        let mut next = self.clone();
        next.sending_chain = step.next_chain_key;
        next.send_message_number = next_position;

        Ok((EncryptedEnvelope { key_material, chain_position: position, nonce, ciphertext }, next))
    }

    /// Decrypt an envelope from the peer.
    ///
    /// Performs a ratchet step first when the envelope carries a new peer
    /// ratchet key. The envelope must sit at exactly the next expected
    /// position of its chain; skipped and repeated positions are rejected.
    ///
    /// # Errors
    ///
    /// - `EpochMismatch` if the envelope belongs to a chain this session has
    ///   left or cannot reach with a single step
    /// - `OutOfOrderMessage` if the position is not the next expected one
    /// - `InvalidKey` if the peer ratchet key is degenerate
    /// - `AuthenticationFailure` if the tag does not verify
    /// - `CounterOverflow` if a counter would wrap
    pub fn decrypt(
        &self,
        env: &impl Environment,
        envelope: &EncryptedEnvelope,
    ) -> Result<(Vec<u8>, SessionState), RatchetError> {
        let incoming = envelope.key_material.ratchet_key;
        let epoch = envelope.key_material.epoch;

        let mut next = match self.peer_ratchet_public {
            Some(current) if current == incoming => {
                if epoch != self.receiving_epoch {
                    return Err(RatchetError::EpochMismatch {
                        expected: self.receiving_epoch,
                        actual: epoch,
                    });
                }
                self.clone()
            },
            None if epoch == 0 => self.adopt_first_peer_key(env, &incoming)?,
            _ => {
                if epoch <= self.receiving_epoch {
                    return Err(RatchetError::EpochMismatch {
                        expected: self.receiving_epoch,
                        actual: epoch,
                    });
                }
                let stepped = self.ratchet_step(env, &incoming)?;
                if stepped.receiving_epoch != epoch {
                    return Err(RatchetError::EpochMismatch {
                        expected: stepped.receiving_epoch,
                        actual: epoch,
                    });
                }
                stepped
            },
        };

        let position = envelope.chain_position;
        if position != next.receive_message_number {
            return Err(RatchetError::OutOfOrderMessage {
                expected: next.receive_message_number,
                actual: position,
            });
        }
        let next_position = position
            .checked_add(1)
            .ok_or(RatchetError::CounterOverflow { current: position })?;

        let step = next.receiving_chain.advance();
        let plaintext = aead_open(
            step.message_key.as_bytes(),
            &envelope.nonce,
            &envelope.associated_data(),
            &envelope.ciphertext,
        )?;

        next.receiving_chain = step.next_chain_key;
        next.receive_message_number = next_position;

        Ok((plaintext, next))
    }

    /// Full DH ratchet step against a new peer ratchet key.
    ///
    /// Receiving half: DH of the current local ratchet key with the peer key
    /// yields a new root key and the receiving chain for the peer's new
    /// sending chain. Sending half: a fresh local ratchet key pair is
    /// generated and a second DH yields another root key and the new sending
    /// chain. Root key, both chains and both counters change; this is the
    /// only path that replaces the root key.
    ///
    /// # Errors
    ///
    /// - `InvalidKey` if the peer key has low order
    /// - `CounterOverflow` if the root epoch would wrap
    pub fn ratchet_step(
        &self,
        env: &impl Environment,
        peer_ratchet_public: &PublicKey,
    ) -> Result<SessionState, RatchetError> {
        let dh = diffie_hellman(self.self_ratchet.private(), peer_ratchet_public)?;
        let (root_key, receiving_chain) = self.root_key.derive(dh.as_bytes());

        let mut next = self.clone();
        next.root_key = root_key;
        next.root_epoch = self.next_root_epoch()?;
        next.receiving_chain = receiving_chain;
        next.receiving_epoch = next.root_epoch;
        next.receive_message_number = 0;
        next.peer_ratchet_public = Some(*peer_ratchet_public);

        next.ratchet_sending(env, peer_ratchet_public)
    }

    /// Sending half of a ratchet step: new local key pair and sending chain.
    fn ratchet_sending(
        &self,
        env: &impl Environment,
        peer_ratchet_public: &PublicKey,
    ) -> Result<SessionState, RatchetError> {
        let fresh = KeyPair::generate(env);
        let dh = diffie_hellman(fresh.private(), peer_ratchet_public)?;
        let (root_key, sending_chain) = self.root_key.derive(dh.as_bytes());

        let mut next = self.clone();
        next.root_key = root_key;
        next.root_epoch = self.next_root_epoch()?;
        next.sending_chain = sending_chain;
        next.sending_epoch = next.root_epoch;
        next.send_message_number = 0;
        next.self_ratchet = fresh;

        Ok(next)
    }

    /// First envelope from the peer, still on the bootstrap chain.
    ///
    /// The peer key is adopted without touching the receiving chain. The
    /// responder immediately moves its sending side onto a DH-bound chain so
    /// the initiator sees a new ratchet key on the next reply.
    fn adopt_first_peer_key(
        &self,
        env: &impl Environment,
        incoming: &PublicKey,
    ) -> Result<SessionState, RatchetError> {
        // Reject low-order keys now rather than at the next step.
        diffie_hellman(self.self_ratchet.private(), incoming)?;

        let mut next = self.clone();
        next.peer_ratchet_public = Some(*incoming);

        match self.role {
            Role::Initiator => Ok(next),
            Role::Responder => next.ratchet_sending(env, incoming),
        }
    }

    fn next_root_epoch(&self) -> Result<u64, RatchetError> {
        self.root_epoch
            .checked_add(1)
            .ok_or(RatchetError::CounterOverflow { current: self.root_epoch })
    }

    /// Role fixed at bootstrap.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current root key.
    pub fn root_key(&self) -> &RootKey {
        &self.root_key
    }

    /// Number of root derivations so far.
    pub fn root_epoch(&self) -> u64 {
        self.root_epoch
    }

    /// Current sending chain key.
    pub fn sending_chain(&self) -> &ChainKey {
        &self.sending_chain
    }

    /// Epoch of the current sending chain.
    pub fn sending_epoch(&self) -> u64 {
        self.sending_epoch
    }

    /// Current receiving chain key.
    pub fn receiving_chain(&self) -> &ChainKey {
        &self.receiving_chain
    }

    /// Epoch of the current receiving chain.
    pub fn receiving_epoch(&self) -> u64 {
        self.receiving_epoch
    }

    /// Local ratchet public key announced in outgoing envelopes.
    pub fn ratchet_public(&self) -> PublicKey {
        self.self_ratchet.public()
    }

    /// Last ratchet key seen from the peer, if any.
    pub fn peer_ratchet_public(&self) -> Option<PublicKey> {
        self.peer_ratchet_public
    }

    /// Position of the next outgoing message.
    pub fn send_message_number(&self) -> u64 {
        self.send_message_number
    }

    /// Next expected incoming position.
    pub fn receive_message_number(&self) -> u64 {
        self.receive_message_number
    }

    /// Serialize to CBOR for persistence.
    ///
    /// The output contains private key material and must be stored with the
    /// same care as the identity key.
    pub fn to_cbor(&self) -> Result<Vec<u8>, CodecError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes).map_err(|e| CodecError::Cbor(e.to_string()))?;
        Ok(bytes)
    }

    /// Deserialize from CBOR.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, CodecError> {
        ciborium::from_reader(bytes).map_err(|e| CodecError::Cbor(e.to_string()))
    }
}
