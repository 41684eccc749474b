//! Binary Merkle-Patricia trie over 31-byte state keys.
//!
//! Node encoding (64 bytes, hashed with blake2b-256):
//! - embedded leaf (`len <= 32`): head `0b01 | len << 2`, 31-byte key,
//!   value right-padded to 32 bytes;
//! - hashed leaf (`len > 32`): head `0b1100_0000`, 31-byte key,
//!   blake2b-256 of the value;
//! - branch: head `left[0] & 0x7f`, then `left[1..32]`, then `right`.
//!
//! The tree is the binary radix over key bits, most significant bit of each
//! byte first; an absent subtree contributes the zero hash.

use std::collections::BTreeMap;

use jam_crypto::blake2b_256;
use jam_types::{Hash, ServiceId};

/// State keys are 31 bytes.
pub const KEY_LEN: usize = 31;

/// A 31-byte state key.
pub type StateKey = [u8; KEY_LEN];

/// Key of a top-level state field: `[chapter, 0 × 30]`.
pub fn chapter_key(chapter: u8) -> StateKey {
    let mut key = [0u8; KEY_LEN];
    key[0] = chapter;
    key
}

/// Key of a service account: `[255, le32(service), 0 × 26]`.
pub fn service_key(service: ServiceId) -> StateKey {
    let mut key = [0u8; KEY_LEN];
    key[0] = 255;
    key[1..5].copy_from_slice(&service.to_le_bytes());
    key
}

/// Key of a service storage item: `le32(service) ‖ blake2b(item key)`,
/// truncated to 31 bytes.
pub fn storage_key(service: ServiceId, item_key: &[u8]) -> StateKey {
    let hashed = blake2b_256(item_key);
    let mut key = [0u8; KEY_LEN];
    key[..4].copy_from_slice(&service.to_le_bytes());
    key[4..].copy_from_slice(&hashed.as_bytes()[..KEY_LEN - 4]);
    key
}

fn leaf_node(key: &StateKey, value: &[u8]) -> [u8; 64] {
    let mut node = [0u8; 64];
    if value.len() <= 32 {
        node[0] = 0b01 | (value.len() as u8) << 2;
        node[1..32].copy_from_slice(key);
        node[32..32 + value.len()].copy_from_slice(value);
    } else {
        node[0] = 0b1100_0000;
        node[1..32].copy_from_slice(key);
        node[32..].copy_from_slice(blake2b_256(value).as_bytes());
    }
    node
}

fn branch_node(left: &Hash, right: &Hash) -> [u8; 64] {
    let mut node = [0u8; 64];
    node[0] = left.as_bytes()[0] & 0x7f;
    node[1..32].copy_from_slice(&left.as_bytes()[1..]);
    node[32..].copy_from_slice(right.as_bytes());
    node
}

fn bit_at(key: &StateKey, depth: usize) -> bool {
    key[depth / 8] & (0x80 >> (depth % 8)) != 0
}

fn subtree_root(entries: &[(&StateKey, &Vec<u8>)], depth: usize) -> Hash {
    match entries {
        [] => Hash::zero(),
        [(key, value)] => blake2b_256(leaf_node(key, value)),
        _ => {
            debug_assert!(depth < KEY_LEN * 8, "duplicate state key");
            let split = entries.partition_point(|(key, _)| !bit_at(key, depth));
            let left = subtree_root(&entries[..split], depth + 1);
            let right = subtree_root(&entries[split..], depth + 1);
            blake2b_256(branch_node(&left, &right))
        }
    }
}

/// Merkle root over the sorted key/value set. Empty input yields the zero
/// hash.
pub fn trie_root(entries: &BTreeMap<StateKey, Vec<u8>>) -> Hash {
    let flat: Vec<(&StateKey, &Vec<u8>)> = entries.iter().collect();
    subtree_root(&flat, 0)
}
