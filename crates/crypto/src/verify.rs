//! Stateless signature verification.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};

/// Ed25519 signature length in bytes
pub const SIGNATURE_LEN: usize = 64;

/// Length of a hex-encoded Ed25519 public key
pub const PUBLIC_KEY_HEX_LEN: usize = 64;

/// Parse a hex-encoded public key.
pub fn decode_public_key(public_key_hex: &str) -> Option<VerifyingKey> {
    if public_key_hex.len() != PUBLIC_KEY_HEX_LEN {
        return None;
    }
    let bytes = hex::decode(public_key_hex).ok()?;
    let array: [u8; 32] = bytes.try_into().ok()?;
    VerifyingKey::from_bytes(&array).ok()
}

/// Verify `signature` over `message` against a hex-encoded public key.
///
/// Returns `false` for any malformed key or signature rather than erroring.
pub fn verify_signature(message: &[u8], signature: &[u8], public_key_hex: &str) -> bool {
    let Some(verifying_key) = decode_public_key(public_key_hex) else {
        return false;
    };
    let Ok(signature_bytes) = <[u8; SIGNATURE_LEN]>::try_from(signature) else {
        return false;
    };
    let signature = Signature::from_bytes(&signature_bytes);
    verifying_key.verify(message, &signature).is_ok()
}

/// Stable short identifier for a public key: first 16 bytes of BLAKE3, hex.
pub fn key_id(public_key_hex: &str) -> String {
    let bytes = hex::decode(public_key_hex).unwrap_or_else(|_| public_key_hex.as_bytes().to_vec());
    let hash = blake3::hash(&bytes);
    hex::encode(&hash.as_bytes()[..16])
}
