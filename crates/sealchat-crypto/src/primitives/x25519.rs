//! X25519 key pairs and Diffie-Hellman.

use std::fmt;

use serde::{Deserialize, Serialize};
use x25519_dalek::StaticSecret;
use zeroize::Zeroize;

use super::secret::Secret;
use crate::{env::Environment, error::RatchetError};

/// Size of X25519 public keys, private keys and shared secrets.
pub const KEY_SIZE: usize = 32;

/// X25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "serde_bytes")] [u8; KEY_SIZE]);

impl PublicKey {
    /// Wrap raw public key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse a public key from untrusted input.
    ///
    /// # Errors
    ///
    /// - `InvalidKey` if the slice is not exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, RatchetError> {
        let bytes: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| RatchetError::InvalidKey { reason: "public key must be 32 bytes" })?;
        Ok(Self(bytes))
    }

    /// Raw public key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Copy of the raw public key bytes.
    pub fn to_bytes(self) -> [u8; KEY_SIZE] {
        self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PublicKey(")?;
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        f.write_str("..)")
    }
}

/// X25519 private key. Zeroized on drop, never printed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrivateKey(Secret<KEY_SIZE>);

impl PrivateKey {
    /// Wrap raw private key bytes. Clamping happens when the key is used.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(Secret::from_bytes(bytes))
    }

    /// Parse a private key from untrusted input.
    ///
    /// # Errors
    ///
    /// - `InvalidKey` if the slice is not exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, RatchetError> {
        let mut bytes: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| RatchetError::InvalidKey { reason: "private key must be 32 bytes" })?;
        let key = Self::from_bytes(bytes);
        bytes.zeroize();
        Ok(key)
    }

    /// Public key matching this private key.
    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(*self.0.as_bytes());
        PublicKey(x25519_dalek::PublicKey::from(&secret).to_bytes())
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        self.0.as_bytes()
    }
}

/// X25519 key pair, used both for long-term identities and ratchet keys.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    public: PublicKey,
    private: PrivateKey,
}

impl KeyPair {
    /// Generate a key pair from the environment's randomness.
    pub fn generate(env: &impl Environment) -> Self {
        let mut bytes = env.random_array::<KEY_SIZE>();
        let private = PrivateKey::from_bytes(bytes);
        bytes.zeroize();
        Self::from_private(private)
    }

    /// Rebuild a key pair from its private half.
    pub fn from_private(private: PrivateKey) -> Self {
        Self { public: private.public_key(), private }
    }

    /// Public half.
    pub fn public(&self) -> PublicKey {
        self.public
    }

    /// Private half.
    pub fn private(&self) -> &PrivateKey {
        &self.private
    }
}

/// Output of a Diffie-Hellman exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedSecret(Secret<KEY_SIZE>);

impl SharedSecret {
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        self.0.as_bytes()
    }
}

/// X25519 scalar multiplication of `private` with `peer_public`.
///
/// Deterministic and symmetric: `dh(a, B) == dh(b, A)`.
///
/// # Errors
///
/// - `InvalidKey` if the peer key is a low-order point (including the
///   all-zero identity). Such keys force a predictable shared secret.
pub fn diffie_hellman(
    private: &PrivateKey,
    peer_public: &PublicKey,
) -> Result<SharedSecret, RatchetError> {
    let secret = StaticSecret::from(*private.as_bytes());
    let peer = x25519_dalek::PublicKey::from(*peer_public.as_bytes());
    let shared = secret.diffie_hellman(&peer);

    if !shared.was_contributory() {
        return Err(RatchetError::InvalidKey { reason: "peer public key has low order" });
    }

    Ok(SharedSecret(Secret::from_bytes(*shared.as_bytes())))
}
