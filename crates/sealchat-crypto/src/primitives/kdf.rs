//! Domain-separated key derivation using HKDF-SHA256

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::KEY_SIZE;

/// Prefix for every HKDF info string
const KDF_LABEL: &[u8] = b"sealchat-v1 ";

/// Derive a 32-byte key from `input` under `context`.
///
/// `salt` is the HKDF extract salt; the ratchet passes the previous root key
/// here so that every root derivation depends on the whole history.
///
/// # Security
///
/// - Deterministic: same `(input, context, salt)` always gives the same key
/// - Different contexts give independent keys for the same input
pub fn kdf(input: &[u8], context: &str, salt: Option<&[u8]>) -> Zeroizing<[u8; KEY_SIZE]> {
    let hkdf = Hkdf::<Sha256>::new(salt, input);

    let mut info = Vec::with_capacity(KDF_LABEL.len() + context.len());
    info.extend_from_slice(KDF_LABEL);
    info.extend_from_slice(context.as_bytes());

    let mut output = Zeroizing::new([0u8; KEY_SIZE]);
    let Ok(()) = hkdf.expand(&info, output.as_mut()) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kdf_is_deterministic() {
        let a = kdf(b"input key material", "root", Some(b"salt"));
        let b = kdf(b"input key material", "root", Some(b"salt"));
        assert_eq!(*a, *b);
    }

    #[test]
    fn contexts_are_independent() {
        let send = kdf(b"input key material", "send", None);
        let recv = kdf(b"input key material", "recv", None);
        assert_ne!(*send, *recv, "different contexts must produce different keys");
    }

    #[test]
    fn salt_changes_output() {
        let unsalted = kdf(b"input key material", "root", None);
        let salted = kdf(b"input key material", "root", Some(&[1u8; 32]));
        assert_ne!(*unsalted, *salted);
    }

    #[test]
    fn works_with_empty_input() {
        let key = kdf(&[], "root", None);
        assert_eq!(key.len(), KEY_SIZE);
    }
}
