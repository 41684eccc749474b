//! Merkle commitments over the canonical state.
//!
//! - [`mmr`]: the append-only Merkle Mountain Range used by block history,
//!   in both its compact peak-digest form and a proof-capable form.
//! - [`trie`]: the binary Merkle-Patricia trie over 31-byte state keys.
//! - [`serializer`]: canonical state → trie key/value pairs → state root.

pub mod mmr;
pub mod serializer;
pub mod trie;

pub use mmr::{mmr_append, Mmr, MmrProof};
pub use serializer::{state_entries, state_root};
pub use trie::{chapter_key, service_key, storage_key, trie_root, StateKey};
