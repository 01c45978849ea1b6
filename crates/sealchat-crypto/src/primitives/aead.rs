//! Authenticated encryption using `XChaCha20-Poly1305`
//!
//! Nonces are supplied by the caller and must never repeat under one key.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};

use super::KEY_SIZE;
use crate::{envelope::NONCE_SIZE, error::RatchetError};

/// Poly1305 tag size (16 bytes)
pub(crate) const TAG_SIZE: usize = 16;

/// Encrypt `plaintext`, binding `aad` into the authentication tag.
///
/// Output is the ciphertext followed by the 16-byte tag.
pub fn aead_encrypt(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    plaintext: &[u8],
) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new(key.into());

    let Ok(ciphertext) =
        cipher.encrypt(XNonce::from_slice(nonce), Payload { msg: plaintext, aad })
    else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    ciphertext
}

/// Decrypt and verify `ciphertext`.
///
/// # Errors
///
/// - `AuthenticationFailure` if the tag does not verify (wrong key, modified
///   ciphertext, nonce or associated data). No partial plaintext is returned.
pub fn aead_open(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, RatchetError> {
    let cipher = XChaCha20Poly1305::new(key.into());

    cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| RatchetError::AuthenticationFailure)
}
