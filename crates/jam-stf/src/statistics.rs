//! Per-validator activity counters, updated once per block.

use jam_types::block::Extrinsic;
use jam_types::state::Statistics;
use jam_types::{ChainState, ValidatorIndex};

/// Update activity statistics for the block being applied.
///
/// Counters reset at epoch boundaries: each epoch's tallies start from zero
/// for the freshly rotated set.
pub fn apply(
    pre: &ChainState,
    author_index: ValidatorIndex,
    epoch_changed: bool,
    extrinsic: &Extrinsic,
) -> ChainState {
    let mut post = pre.clone();

    if epoch_changed {
        post.statistics = Statistics::with_validators(post.kappa.len());
        // service counters persist across epochs
        post.statistics.services = pre.statistics.services.clone();
    }

    if let Some(author) = post.statistics.validator_mut(author_index as usize) {
        author.blocks += 1;
        author.tickets += extrinsic.tickets.len() as u64;
        author.pre_images += extrinsic.preimages.len() as u64;
        author.pre_images_size +=
            extrinsic.preimages.iter().map(|p| p.blob.len() as u64).sum::<u64>();
    }

    for assurance in &extrinsic.assurances {
        if let Some(stats) = post.statistics.validator_mut(assurance.validator_index as usize) {
            stats.assurances += 1;
        }
    }

    for guarantee in &extrinsic.guarantees {
        let index = post
            .kappa
            .iter()
            .position(|v| v.ed25519 == guarantee.guarantor_public_key);
        if let Some(stats) = index.and_then(|i| post.statistics.validator_mut(i)) {
            stats.guarantees += 1;
        }
    }

    post
}

#[cfg(test)]
mod tests {
    use jam_types::block::{Assurance, Preimage};
    use jam_types::{HexBytes, Signature};

    use crate::test_support::chain;

    use super::*;

    #[test]
    fn author_counters_bump() {
        let c = chain(3);
        let extrinsic = Extrinsic {
            preimages: vec![Preimage { requester: 1, blob: HexBytes::new(vec![0; 10]) }],
            ..Default::default()
        };
        let post = apply(&c.state, 1, false, &extrinsic);
        assert_eq!(post.statistics.validators[1].blocks, 1);
        assert_eq!(post.statistics.validators[1].pre_images, 1);
        assert_eq!(post.statistics.validators[1].pre_images_size, 10);
        assert_eq!(post.statistics.validators[0].blocks, 0);
    }

    #[test]
    fn assurers_counted_by_index() {
        let c = chain(3);
        let extrinsic = Extrinsic {
            assurances: vec![
                Assurance {
                    validator_index: 0,
                    bitfield: HexBytes::default(),
                    signature: Signature::zero(),
                    anchor: None,
                },
                Assurance {
                    validator_index: 2,
                    bitfield: HexBytes::default(),
                    signature: Signature::zero(),
                    anchor: None,
                },
            ],
            ..Default::default()
        };
        let post = apply(&c.state, 0, false, &extrinsic);
        assert_eq!(post.statistics.validators[0].assurances, 1);
        assert_eq!(post.statistics.validators[1].assurances, 0);
        assert_eq!(post.statistics.validators[2].assurances, 1);
    }

    #[test]
    fn guarantors_counted_by_key() {
        let c = chain(3);
        let mut report = crate::test_support::report(0, 1);
        crate::test_support::sign_report(&mut report, &c.keys[2]);
        let extrinsic = Extrinsic { guarantees: vec![report], ..Default::default() };
        let post = apply(&c.state, 0, false, &extrinsic);
        assert_eq!(post.statistics.validators[2].guarantees, 1);
    }

    #[test]
    fn counters_reset_on_epoch_change() {
        let mut c = chain(3);
        c.state.statistics.validators[0].blocks = 7;
        let post = apply(&c.state, 0, true, &Extrinsic::default());
        assert_eq!(post.statistics.validators[0].blocks, 1);
    }
}
