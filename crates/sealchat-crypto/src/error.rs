//! Error types for the ratchet engine and envelope codec.

use thiserror::Error;

/// Errors produced by ratchet operations.
///
/// Every variant aborts exactly one operation. No successor state is returned
/// alongside an error, so the caller's prior state stays valid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RatchetError {
    /// Malformed or unusable key material
    #[error("invalid key: {reason}")]
    InvalidKey {
        /// What was wrong with the key
        reason: &'static str,
    },

    /// AEAD tag verification failed
    #[error("authentication failed: ciphertext, nonce or header was modified")]
    AuthenticationFailure,

    /// Envelope position does not match the next expected position
    #[error("out of order message: expected position {expected}, got {actual}")]
    OutOfOrderMessage {
        /// Next position the receiving chain expects
        expected: u64,
        /// Position carried by the envelope
        actual: u64,
    },

    /// Envelope belongs to a chain this session is not on
    #[error("epoch mismatch: expected epoch {expected}, got {actual}")]
    EpochMismatch {
        /// Epoch of the current receiving chain
        expected: u64,
        /// Epoch carried by the envelope
        actual: u64,
    },

    /// Message or epoch counter would wrap
    #[error("counter overflow at {current}")]
    CounterOverflow {
        /// Counter value that cannot be incremented
        current: u64,
    },

    /// Envelope or state could not be decoded
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl RatchetError {
    /// Returns true if the session cannot continue past this error.
    ///
    /// Ordering errors only mean this particular envelope is not the next one
    /// in line. Everything else indicates tampering, corrupt input or an
    /// exhausted chain.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::InvalidKey { .. }
            | Self::AuthenticationFailure
            | Self::CounterOverflow { .. }
            | Self::Codec(_) => true,
            Self::OutOfOrderMessage { .. } | Self::EpochMismatch { .. } => false,
        }
    }
}

/// Errors produced while encoding or decoding envelopes and state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input shorter than the fixed header
    #[error("envelope too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum bytes required
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Leading bytes are not the envelope magic
    #[error("invalid magic number")]
    InvalidMagic,

    /// Header version this build does not understand
    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(u8),

    /// Header length field disagrees with the payload
    #[error("length mismatch: header declares {declared} bytes, payload has {actual}")]
    LengthMismatch {
        /// Length from the header
        declared: usize,
        /// Bytes actually present
        actual: usize,
    },

    /// Ciphertext exceeds the maximum envelope size
    #[error("ciphertext too large: {size} bytes")]
    CiphertextTooLarge {
        /// Ciphertext size in bytes
        size: usize,
    },

    /// CBOR (de)serialization of session state failed
    #[error("cbor error: {0}")]
    Cbor(String),
}
