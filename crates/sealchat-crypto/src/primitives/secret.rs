use std::fmt;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Fixed-size secret bytes.
///
/// Zeroized on drop, redacted in debug output and compared in constant time.
/// Byte access stays inside the crate so secrets only leave through the typed
/// wrappers (`PrivateKey`, `ChainKey`, ...).
#[derive(Clone, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub(crate) struct Secret<const N: usize>(#[serde(with = "serde_bytes")] [u8; N]);

impl<const N: usize> Secret<N> {
    pub(crate) fn from_bytes(bytes: [u8; N]) -> Self {
        Self(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }
}

impl<const N: usize> PartialEq for Secret<N> {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }
}

impl<const N: usize> fmt::Debug for Secret<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_is_redacted() {
        let secret = Secret::from_bytes([0x42u8; 32]);
        let printed = format!("{secret:?}");

        assert_eq!(printed, "Secret(***)");
        assert!(!printed.contains("42"));
    }

    #[test]
    fn equality_compares_contents() {
        assert_eq!(Secret::from_bytes([1u8; 32]), Secret::from_bytes([1u8; 32]));
        assert_ne!(Secret::from_bytes([1u8; 32]), Secret::from_bytes([2u8; 32]));
    }

    #[test]
    fn cbor_roundtrip_preserves_bytes() {
        let secret = Secret::from_bytes([7u8; 32]);

        let mut bytes = Vec::new();
        ciborium::into_writer(&secret, &mut bytes).unwrap();
        let decoded: Secret<32> = ciborium::from_reader(bytes.as_slice()).unwrap();

        assert_eq!(decoded, secret);
    }
}
