//! Primitive layer: X25519, HKDF-SHA256 and XChaCha20-Poly1305.
//!
//! Stateless building blocks. Everything above this module works in terms of
//! the typed keys defined here and never touches raw curve or cipher APIs.

mod aead;
mod kdf;
pub(crate) mod secret;
mod x25519;

pub(crate) use aead::TAG_SIZE;
pub use aead::{aead_encrypt, aead_open};
pub use kdf::kdf;
pub use x25519::{KEY_SIZE, KeyPair, PrivateKey, PublicKey, SharedSecret, diffie_hellman};
