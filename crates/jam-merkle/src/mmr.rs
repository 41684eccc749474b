//! Merkle Mountain Range.
//!
//! History entries carry the compact `{peaks, count}` digest
//! ([`jam_types::MmrPeaks`]); [`mmr_append`] is the only operation the
//! history STF needs. [`Mmr`] additionally retains every leaf so membership
//! proofs can be produced and checked.
//!
//! Peak combination uses keccak-256, older subtree on the left.

use jam_crypto::keccak_256_concat;
use jam_types::{Hash, MmrPeaks};

/// Append a leaf to the compact peak form.
///
/// While bit `h` of the pre-append count is set, the peak at height `h` is
/// folded into the running hash and cleared; the running hash then lands at
/// the first free height.
pub fn mmr_append(mmr: &mut MmrPeaks, leaf: Hash) {
    let mut running = leaf;
    let mut height = 0usize;

    while mmr.count & (1 << height) != 0 {
        let peak = mmr
            .peaks
            .get_mut(height)
            .and_then(|slot| slot.take())
            .unwrap_or_else(Hash::zero);
        running = keccak_256_concat(peak, running);
        height += 1;
    }

    if mmr.peaks.len() <= height {
        mmr.peaks.resize(height + 1, None);
    }
    mmr.peaks[height] = Some(running);
    mmr.count += 1;
}

/// Concatenation of the present peaks, low height first; feeds the history
/// entry's state root.
pub fn peaks_bytes(mmr: &MmrPeaks) -> Vec<u8> {
    let mut out = Vec::with_capacity(mmr.peaks.len() * 32);
    for peak in mmr.peaks.iter().flatten() {
        out.extend_from_slice(peak.as_bytes());
    }
    out
}

/// Proof-capable MMR: the compact form plus the appended leaves.
#[derive(Clone, Debug, Default)]
pub struct Mmr {
    peaks: MmrPeaks,
    leaves: Vec<Hash>,
}

/// Membership proof for one leaf.
#[derive(Clone, Debug)]
pub struct MmrProof {
    pub leaf_index: u64,
    /// Sibling hashes from the leaf up to its mountain peak.
    pub path: Vec<Hash>,
    /// Height of the mountain the leaf lives in.
    pub peak_height: usize,
}

impl Mmr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the proof-capable form from raw leaves.
    pub fn from_leaves(leaves: impl IntoIterator<Item = Hash>) -> Self {
        let mut mmr = Self::new();
        for leaf in leaves {
            mmr.append(leaf);
        }
        mmr
    }

    pub fn append(&mut self, leaf: Hash) {
        self.leaves.push(leaf);
        mmr_append(&mut self.peaks, leaf);
    }

    pub fn peaks(&self) -> &MmrPeaks {
        &self.peaks
    }

    pub fn len(&self) -> u64 {
        self.peaks.count
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.count == 0
    }

    /// Mountains as `(height, first leaf index)`, left to right.
    ///
    /// The leftmost mountain is the largest: mountain sizes are the set bits
    /// of the leaf count, most significant first.
    fn mountains(&self) -> Vec<(usize, u64)> {
        let count = self.peaks.count;
        let mut out = Vec::new();
        let mut offset = 0u64;
        for height in (0..u64::BITS as usize).rev() {
            if count & (1 << height) != 0 {
                out.push((height, offset));
                offset += 1 << height;
            }
        }
        out
    }

    /// Produce a membership proof for the leaf at `index`.
    pub fn prove(&self, index: u64) -> Option<MmrProof> {
        if index >= self.peaks.count {
            return None;
        }

        let (peak_height, mountain_start) = self
            .mountains()
            .into_iter()
            .find(|(height, start)| index < start + (1u64 << height))?;

        // Sibling path inside the mountain's perfect binary tree.
        let mountain =
            &self.leaves[mountain_start as usize..mountain_start as usize + (1 << peak_height)];
        let mut level: Vec<Hash> = mountain.to_vec();
        let mut position = (index - mountain_start) as usize;
        let mut path = Vec::with_capacity(peak_height);

        while level.len() > 1 {
            path.push(level[position ^ 1]);
            level = level
                .chunks(2)
                .map(|pair| keccak_256_concat(pair[0], pair[1]))
                .collect();
            position /= 2;
        }

        Some(MmrProof { leaf_index: index, path, peak_height })
    }
}

impl MmrProof {
    /// Check that `leaf` is committed by `peaks` at this proof's position.
    pub fn verify(&self, leaf: Hash, peaks: &MmrPeaks) -> bool {
        let Some(expected) = peaks.peaks.get(self.peak_height).copied().flatten() else {
            return false;
        };
        if self.path.len() != self.peak_height {
            return false;
        }

        // Position within the mountain: low bits of the leaf index.
        let mut position = self.leaf_index & ((1u64 << self.peak_height) - 1);
        let mut acc = leaf;
        for sibling in &self.path {
            acc = if position & 1 == 0 {
                keccak_256_concat(acc, sibling)
            } else {
                keccak_256_concat(sibling, acc)
            };
            position >>= 1;
        }

        acc == expected
    }
}
