//! Sealchat Conversation Encryption
//!
//! Per-conversation end-to-end encryption engine. Every operation is a pure
//! function from the current [`SessionState`] and an input to an output and
//! a successor state. The engine performs no I/O and keeps nothing between
//! calls; randomness comes from a caller-provided [`Environment`] so tests
//! and simulations stay deterministic.
//!
//! # Key Lifecycle
//!
//! ```text
//! Identity keys (A, B)
//!        │
//!        ▼ X25519
//! Shared secret ──HKDF "root"──► Root key (epoch 0)
//!        │                          │
//!        │                          ├─ HKDF "send" ─► initiator → responder chain
//!        │                          └─ HKDF "recv" ─► responder → initiator chain
//!        ▼
//! DH ratchet step (new peer ratchet key)
//!        │  HKDF(dh, "root", old root) → root key (epoch n+1)
//!        │  HKDF(dh, "chain", old root) → chain key
//!        ▼
//! Chain ratchet (HMAC-SHA256) → Message keys
//!        │
//!        ▼
//! XChaCha20-Poly1305 → EncryptedEnvelope
//! ```
//!
//! # Security
//!
//! Forward Secrecy:
//! - Chain ratchet: message keys and the next chain key are one-way HMAC
//!   outputs, old chain keys are zeroized on drop
//! - DH ratchet: each step mixes a fresh X25519 secret into the root key
//!
//! Authenticity:
//! - XChaCha20-Poly1305 with the envelope header (ratchet key, epoch, chain
//!   position) as associated data
//! - Failed tag → [`RatchetError::AuthenticationFailure`], no plaintext
//!
//! Fail-closed:
//! - Operations borrow the current state and only return a successor on
//!   success. On error the caller still holds the unchanged prior state.
//!
//! The envelope never carries key material beyond the sender's public ratchet
//! key. The receiver re-derives every message key from its own chain.
//!
//! # Concurrency
//!
//! Two operations run against the same state snapshot both advance the same
//! chain. Only one successor may be persisted, so callers must serialize all
//! operations on a conversation.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod bootstrap;
mod chain;
mod env;
mod envelope;
mod error;
mod primitives;
mod session;

pub use bootstrap::initialize_session;
pub use chain::{ChainKey, ChainStep, MessageKey};
pub use env::{Environment, SeededEnv, SystemEnv};
pub use envelope::{EncryptedEnvelope, KeyMaterial, NONCE_RANDOM_SIZE, NONCE_SIZE};
pub use error::{CodecError, RatchetError};
pub use primitives::{
    KEY_SIZE, KeyPair, PrivateKey, PublicKey, SharedSecret, aead_encrypt, aead_open,
    diffie_hellman, kdf,
};
pub use session::{Role, RootKey, SessionState};
