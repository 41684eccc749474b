//! ed25519 helpers bridging `ed25519-dalek` and the wire primitives.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};

use jam_types::{PublicKey, Signature};

/// Sign a message, returning the wire signature.
pub fn sign(key: &SigningKey, message: &[u8]) -> Signature {
    Signature(key.sign(message).to_bytes())
}

/// The wire form of a signing key's public half.
pub fn verifying_key_bytes(key: &SigningKey) -> PublicKey {
    PublicKey(key.verifying_key().to_bytes())
}

/// Verify a wire signature. Malformed keys verify as false.
pub fn verify(public_key: &PublicKey, message: &[u8], signature: &Signature) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(public_key.as_bytes()) else {
        return false;
    };
    let signature = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    verifying_key.verify(message, &signature).is_ok()
}
