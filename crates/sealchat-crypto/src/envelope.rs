//! Encrypted envelope and its wire format.
//!
//! An envelope is a fixed 88-byte header (Big Endian) followed by the AEAD
//! ciphertext:
//!
//! ```text
//!  0..4    magic "SCEV"
//!  4       version
//!  5..8    reserved (zero)
//!  8..16   epoch            u64
//! 16..24   chain position   u64
//! 24..28   ciphertext len   u32
//! 28..32   reserved (zero)
//! 32..64   sender ratchet public key
//! 64..88   XChaCha20 nonce
//! 88..     ciphertext (including 16-byte tag)
//! ```
//!
//! The header carries only public data. Message keys are re-derived by the
//! receiver from its own chain and are never part of the envelope.

use bytes::BufMut;

use crate::{
    error::CodecError,
    primitives::{KEY_SIZE, PublicKey, TAG_SIZE},
};

/// XChaCha20 nonce size (24 bytes)
pub const NONCE_SIZE: usize = 24;

/// Size of the random suffix in the nonce (8 bytes)
pub const NONCE_RANDOM_SIZE: usize = 8;

/// Public data the receiver needs to locate the sender's chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMaterial {
    /// Sender's current ratchet public key
    pub ratchet_key: PublicKey,
    /// Number of root derivations behind the sending chain
    pub epoch: u64,
}

/// An encrypted message with the metadata needed to decrypt it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    /// Sender ratchet key and chain epoch
    pub key_material: KeyMaterial,
    /// Position of the message key in the sending chain
    pub chain_position: u64,
    /// The 24-byte `XChaCha20` nonce
    pub nonce: [u8; NONCE_SIZE],
    /// The ciphertext including 16-byte Poly1305 tag
    pub ciphertext: Vec<u8>,
}

impl EncryptedEnvelope {
    /// Size of the serialized header (88 bytes)
    pub const HEADER_SIZE: usize = 88;

    /// Magic number: "SCEV" in ASCII (0x53434556)
    pub const MAGIC: u32 = 0x5343_4556;

    /// Current envelope version
    pub const VERSION: u8 = 0x01;

    /// Maximum ciphertext size (16 MB)
    pub const MAX_CIPHERTEXT_SIZE: u32 = 16 * 1024 * 1024;

    /// Plaintext length (ciphertext length minus authentication tag).
    pub fn plaintext_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(TAG_SIZE)
    }

    /// Total encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        Self::HEADER_SIZE + self.ciphertext.len()
    }

    /// Associated data bound into the AEAD tag.
    ///
    /// Covers every header field the receiver acts on, so a relabelled
    /// envelope fails authentication instead of landing on the wrong chain
    /// position.
    pub(crate) fn associated_data(&self) -> [u8; KEY_SIZE + 16] {
        header_aad(&self.key_material, self.chain_position)
    }

    /// Encode envelope into `dst`.
    ///
    /// # Errors
    ///
    /// - `CiphertextTooLarge` if the ciphertext exceeds `MAX_CIPHERTEXT_SIZE`
    pub fn encode_into(&self, dst: &mut impl BufMut) -> Result<(), CodecError> {
        let size = self.ciphertext.len();
        if size > Self::MAX_CIPHERTEXT_SIZE as usize {
            return Err(CodecError::CiphertextTooLarge { size });
        }

        dst.put_u32(Self::MAGIC);
        dst.put_u8(Self::VERSION);
        dst.put_bytes(0, 3);
        dst.put_u64(self.key_material.epoch);
        dst.put_u64(self.chain_position);
        dst.put_u32(size as u32);
        dst.put_bytes(0, 4);
        dst.put_slice(self.key_material.ratchet_key.as_bytes());
        dst.put_slice(&self.nonce);
        dst.put_slice(&self.ciphertext);

        Ok(())
    }

    /// Encode envelope to a fresh buffer.
    ///
    /// # Errors
    ///
    /// - `CiphertextTooLarge` if the ciphertext exceeds `MAX_CIPHERTEXT_SIZE`
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Decode an envelope from wire bytes.
    ///
    /// Trailing bytes beyond the declared ciphertext length are rejected.
    ///
    /// # Errors
    ///
    /// - `TooShort` if the buffer cannot hold the header
    /// - `InvalidMagic` / `UnsupportedVersion` for foreign or future data
    /// - `CiphertextTooLarge` if the declared length exceeds the maximum
    /// - `LengthMismatch` if the declared length disagrees with the buffer
    ///
    /// # Security
    ///
    /// All checks run before the ciphertext is copied, so garbage input never
    /// causes a large allocation. A structurally valid envelope is not yet
    /// authenticated; that happens when the session opens it.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let Some((header, ciphertext)) =
            bytes.split_first_chunk::<{ EncryptedEnvelope::HEADER_SIZE }>()
        else {
            return Err(CodecError::TooShort { expected: Self::HEADER_SIZE, actual: bytes.len() });
        };

        if u32::from_be_bytes(field(header, 0)) != Self::MAGIC {
            return Err(CodecError::InvalidMagic);
        }

        let version = header[4];
        if version != Self::VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }

        let epoch = u64::from_be_bytes(field(header, 8));
        let chain_position = u64::from_be_bytes(field(header, 16));
        let declared = u32::from_be_bytes(field(header, 24));

        if declared > Self::MAX_CIPHERTEXT_SIZE {
            return Err(CodecError::CiphertextTooLarge { size: declared as usize });
        }

        if ciphertext.len() != declared as usize {
            return Err(CodecError::LengthMismatch {
                declared: declared as usize,
                actual: ciphertext.len(),
            });
        }

        Ok(Self {
            key_material: KeyMaterial {
                ratchet_key: PublicKey::from_bytes(field(header, 32)),
                epoch,
            },
            chain_position,
            nonce: field(header, 64),
            ciphertext: ciphertext.to_vec(),
        })
    }
}

/// Copy a fixed-size field out of the header.
fn field<const N: usize>(header: &[u8; EncryptedEnvelope::HEADER_SIZE], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&header[offset..offset + N]);
    out
}

/// Associated data for a header: ratchet key || epoch || position.
pub(crate) fn header_aad(key_material: &KeyMaterial, chain_position: u64) -> [u8; KEY_SIZE + 16] {
    let mut aad = [0u8; KEY_SIZE + 16];
    aad[..KEY_SIZE].copy_from_slice(key_material.ratchet_key.as_bytes());
    aad[KEY_SIZE..KEY_SIZE + 8].copy_from_slice(&key_material.epoch.to_be_bytes());
    aad[KEY_SIZE + 8..].copy_from_slice(&chain_position.to_be_bytes());
    aad
}

/// Build a 24-byte nonce for `XChaCha20`.
///
/// Structure:
/// - bytes 0-7: epoch (big-endian)
/// - bytes 8-15: chain position (big-endian)
/// - bytes 16-23: random suffix (caller-provided)
pub(crate) fn build_nonce(
    epoch: u64,
    chain_position: u64,
    random_suffix: [u8; NONCE_RANDOM_SIZE],
) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];

    nonce[0..8].copy_from_slice(&epoch.to_be_bytes());
    nonce[8..16].copy_from_slice(&chain_position.to_be_bytes());
    nonce[16..24].copy_from_slice(&random_suffix);

    nonce
}
