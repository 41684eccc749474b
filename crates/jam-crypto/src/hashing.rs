//! Hash functions used across the protocol.
//!
//! blake2b-256 is the system hash (state keys, digests, header hashes);
//! keccak-256 is used only by the history MMR.

use sha3::{Digest as _, Keccak256};

use jam_types::Hash;

pub use jam_types::codec::{blake2b_256, blake2b_256_concat};

/// keccak-256 of arbitrary bytes.
pub fn keccak_256(data: impl AsRef<[u8]>) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data.as_ref());
    Hash(hasher.finalize().into())
}

/// keccak-256 over the concatenation of two byte strings.
pub fn keccak_256_concat(a: impl AsRef<[u8]>, b: impl AsRef<[u8]>) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(a.as_ref());
    hasher.update(b.as_ref());
    Hash(hasher.finalize().into())
}
