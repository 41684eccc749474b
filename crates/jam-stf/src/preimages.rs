//! Solicited preimage provisioning.
//!
//! A preimage is admitted only if the requesting service has a matching
//! `lookup_meta` slot keyed by `(blake2b(blob), |blob|)`. Input must be
//! strictly sorted by `(requester, hash)`; re-provisioning an already-held
//! preimage is a no-op.

use jam_crypto::blake2b_256;
use jam_types::block::Preimage;
use jam_types::state::LookupKey;
use jam_types::{ChainState, TimeSlot};

/// Fatal preimage failures; state is left untouched.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PreimageError {
    #[error("preimages_not_sorted_unique")]
    NotSortedUnique,

    #[error("preimage_unneeded")]
    Unneeded,
}

/// Counts of admitted blobs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PreimagesOutput {
    pub provided_count: u64,
    pub provided_size: u64,
}

/// Apply the preimages extrinsic.
pub fn apply(
    pre: &ChainState,
    preimages: &[Preimage],
    slot: TimeSlot,
) -> Result<(ChainState, PreimagesOutput), PreimageError> {
    if preimages.is_empty() {
        return Ok((pre.clone(), PreimagesOutput::default()));
    }

    // Strict (requester, hash) ordering, no duplicates.
    let keys: Vec<(u32, jam_types::Hash)> =
        preimages.iter().map(|p| (p.requester, blake2b_256(&p.blob))).collect();
    for pair in keys.windows(2) {
        if pair[0] >= pair[1] {
            return Err(PreimageError::NotSortedUnique);
        }
    }

    // Solicitation check before any mutation: a single unneeded preimage
    // rejects the extrinsic with the pre-state unchanged.
    for (preimage, (_, hash)) in preimages.iter().zip(&keys) {
        let key = LookupKey { hash: *hash, length: preimage.blob.len() as u32 };
        let solicited = pre
            .accounts
            .get(&preimage.requester)
            .is_some_and(|account| account.is_solicited(&key));
        if !solicited {
            tracing::debug!(requester = preimage.requester, %hash, "unsolicited preimage");
            return Err(PreimageError::Unneeded);
        }
    }

    let mut post = pre.clone();
    let mut output = PreimagesOutput::default();

    for (preimage, (_, hash)) in preimages.iter().zip(&keys) {
        let account = post
            .accounts
            .get_mut(&preimage.requester)
            .expect("solicitation checked above");

        // Idempotent: an already-provided preimage changes nothing.
        if account.preimages.contains_key(hash) {
            continue;
        }

        account.preimages.insert(*hash, preimage.blob.clone());
        let key = LookupKey { hash: *hash, length: preimage.blob.len() as u32 };
        if let Some(entry) = account.lookup_entry_mut(&key) {
            entry.value.push(slot);
        }

        output.provided_count += 1;
        output.provided_size += preimage.blob.len() as u64;

        let stats = post.statistics.service_mut(preimage.requester);
        stats.provided_count += 1;
        stats.provided_size += preimage.blob.len() as u64;
    }

    Ok((post, output))
}
