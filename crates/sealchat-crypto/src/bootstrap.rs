//! Session bootstrap from long-term identity keys.

use crate::{
    chain::ChainKey,
    env::Environment,
    error::RatchetError,
    primitives::{KeyPair, PrivateKey, PublicKey, diffie_hellman, kdf},
    session::{ROOT_CONTEXT, Role, RootKey, SessionState},
};

/// KDF context for the initiator → responder bootstrap chain
const INITIATOR_CHAIN_CONTEXT: &str = "send";

/// KDF context for the responder → initiator bootstrap chain
const RESPONDER_CHAIN_CONTEXT: &str = "recv";

/// Create the initial session state for one side of a conversation.
///
/// Both sides compute the same X25519 secret from their identity keys and
/// derive the same root key and the same two bootstrap chains from it. The
/// initiator sends on the "send" chain and receives on the "recv" chain; the
/// responder does the opposite, so each side's sending chain is the other
/// side's receiving chain. A fresh ratchet key pair is generated; no peer
/// ratchet key is known yet.
///
/// # Errors
///
/// - `InvalidKey` if the peer identity key has low order
pub fn initialize_session(
    env: &impl Environment,
    self_identity_private: &PrivateKey,
    peer_identity_public: &PublicKey,
    role: Role,
) -> Result<SessionState, RatchetError> {
    let shared = diffie_hellman(self_identity_private, peer_identity_public)?;
    let root = kdf(shared.as_bytes(), ROOT_CONTEXT, None);

    let initiator_chain = kdf(root.as_slice(), INITIATOR_CHAIN_CONTEXT, None);
    let responder_chain = kdf(root.as_slice(), RESPONDER_CHAIN_CONTEXT, None);
    let initiator_chain = ChainKey::from_bytes(*initiator_chain);
    let responder_chain = ChainKey::from_bytes(*responder_chain);

    let (sending_chain, receiving_chain) = match role {
        Role::Initiator => (initiator_chain, responder_chain),
        Role::Responder => (responder_chain, initiator_chain),
    };

    Ok(SessionState::new(
        role,
        RootKey::from_bytes(*root),
        sending_chain,
        receiving_chain,
        KeyPair::generate(env),
    ))
}
