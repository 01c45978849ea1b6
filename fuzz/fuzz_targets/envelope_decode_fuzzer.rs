//! Fuzz target for EncryptedEnvelope::decode
//!
//! Arbitrary bytes must never panic the decoder. Anything that decodes must
//! re-encode to the same length and decode back to the same envelope.
//! Reserved header bytes are ignored on decode, so the bytes themselves may
//! differ.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sealchat_crypto::EncryptedEnvelope;

fuzz_target!(|data: &[u8]| {
    let Ok(envelope) = EncryptedEnvelope::decode(data) else {
        return;
    };

    assert_eq!(envelope.encoded_len(), data.len());

    let encoded = envelope.encode().expect("decoded envelope must re-encode");
    assert_eq!(encoded.len(), data.len());

    let again = EncryptedEnvelope::decode(&encoded).expect("re-encoded envelope must decode");
    assert_eq!(again, envelope);
});
