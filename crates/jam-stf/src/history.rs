//! Recent-history (beta) transition.
//!
//! Every block appends one entry: the parent entry's state root is
//! backfilled, the accumulation root is appended to the running MMR, and the
//! window is trimmed to the last eight blocks.

use jam_crypto::blake2b_256;
use jam_merkle::mmr::{mmr_append, peaks_bytes};
use jam_types::report::ReportedPackage;
use jam_types::state::{BetaBlock, MmrPeaks};
use jam_types::{ChainState, Hash};

/// History block input.
#[derive(Clone, Debug)]
pub struct HistoryInput {
    pub header_hash: Hash,
    pub parent_state_root: Hash,
    pub accumulate_root: Hash,
    pub work_packages: Vec<ReportedPackage>,
}

/// Apply the history transition. Infallible: history always advances.
pub fn apply(pre: &ChainState, input: &HistoryInput) -> ChainState {
    let mut post = pre.clone();

    // The youngest entry learns its final state root only once the child
    // block arrives.
    if let Some(last) = post.beta.last_mut() {
        last.state_root = input.parent_state_root;
    }

    let mut mmr = post.beta.last().map(|b| b.mmr.clone()).unwrap_or_else(MmrPeaks::default);
    mmr_append(&mut mmr, input.accumulate_root);

    let state_root =
        blake2b_256([input.header_hash.as_bytes().as_slice(), &peaks_bytes(&mmr)].concat());
    post.beta.push(BetaBlock {
        header_hash: input.header_hash,
        state_root,
        mmr,
        reported: input.work_packages.clone(),
    });

    if post.beta.len() > ChainState::BETA_LIMIT {
        let drop = post.beta.len() - ChainState::BETA_LIMIT;
        post.beta.drain(..drop);
    }

    post
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ChainState {
        ChainState::genesis(vec![], 12, 11, 3)
    }

    fn input(tag: u8) -> HistoryInput {
        HistoryInput {
            header_hash: Hash::from_bytes([tag; 32]),
            parent_state_root: Hash::from_bytes([tag ^ 0xf0; 32]),
            accumulate_root: Hash::from_bytes([tag ^ 0x0f; 32]),
            work_packages: vec![ReportedPackage {
                hash: Hash::from_bytes([tag + 1; 32]),
                exports_root: Hash::zero(),
            }],
        }
    }

    #[test]
    fn first_entry_appended() {
        let post = apply(&state(), &input(1));
        assert_eq!(post.beta.len(), 1);
        let entry = &post.beta[0];
        assert_eq!(entry.header_hash, Hash::from_bytes([1; 32]));
        assert_eq!(entry.mmr.count, 1);
        assert_eq!(entry.reported.len(), 1);
    }

    #[test]
    fn parent_state_root_backfilled() {
        let post = apply(&state(), &input(1));
        let post = apply(&post, &input(2));
        // the first entry's root was rewritten by the second block
        assert_eq!(post.beta[0].state_root, input(2).parent_state_root);
    }

    #[test]
    fn mmr_grows_per_block() {
        let mut s = state();
        for tag in 1..=4 {
            s = apply(&s, &input(tag));
        }
        assert_eq!(s.beta.last().unwrap().mmr.count, 4);
    }

    #[test]
    fn window_trimmed_to_eight() {
        let mut s = state();
        for tag in 1..=12 {
            s = apply(&s, &input(tag));
        }
        assert_eq!(s.beta.len(), 8);
        // oldest retained entry is block 5
        assert_eq!(s.beta[0].header_hash, Hash::from_bytes([5; 32]));
        // the MMR count keeps the full chain length
        assert_eq!(s.beta.last().unwrap().mmr.count, 12);
        s.check_invariants().unwrap();
    }

    #[test]
    fn entry_root_binds_header_and_peaks() {
        let a = apply(&state(), &input(1));
        let b = apply(&state(), &input(2));
        assert_ne!(a.beta[0].state_root, b.beta[0].state_root);
    }
}
