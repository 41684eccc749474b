//! Availability assurances: validator bitfield attestations over per-core
//! availability assignments.

use jam_crypto::ed25519;
use jam_types::block::Assurance;
use jam_types::report::WorkReport;
use jam_types::{super_majority, ChainState, Hash, TimeSlot};

/// Assurances block input.
#[derive(Clone, Debug)]
pub struct AssurancesInput {
    pub parent: Option<Hash>,
    pub slot: TimeSlot,
    pub assurances: Vec<Assurance>,
}

/// Reports whose availability reached super-majority this block.
#[derive(Clone, Debug, Default)]
pub struct AssurancesOutput {
    pub reported: Vec<WorkReport>,
}

/// Fatal assurance failures; the whole block is rejected and no partial
/// post-state survives.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AssuranceError {
    #[error("bad_attestation_parent")]
    BadAttestationParent,

    #[error("bad_validator_index")]
    BadValidatorIndex,

    #[error("not_sorted_or_unique_assurers")]
    NotSortedOrUniqueAssurers,

    #[error("bad_signature")]
    BadSignature,

    #[error("core_not_engaged")]
    CoreNotEngaged,
}

/// Apply the assurances extrinsic.
pub fn apply(
    pre: &ChainState,
    input: &AssurancesInput,
) -> Result<(ChainState, AssurancesOutput), AssuranceError> {
    let mut post = pre.clone();

    // Stale assignments are swept before any attestation is considered.
    for slot in post.avail_assignments.iter_mut() {
        if slot.as_ref().is_some_and(|a| a.timeout < input.slot) {
            *slot = None;
        }
    }

    if input.assurances.is_empty() {
        return Ok((post, AssurancesOutput::default()));
    }

    let mut previous_index: Option<u16> = None;
    for assurance in &input.assurances {
        // Anchor must match the parent block unless both are absent.
        if let (Some(anchor), Some(parent)) = (&assurance.anchor, &input.parent) {
            if anchor != parent {
                return Err(AssuranceError::BadAttestationParent);
            }
        } else if assurance.anchor.is_some() != input.parent.is_some() {
            return Err(AssuranceError::BadAttestationParent);
        }

        let validator = post
            .kappa
            .get(assurance.validator_index as usize)
            .ok_or(AssuranceError::BadValidatorIndex)?;

        if previous_index.is_some_and(|prev| prev >= assurance.validator_index) {
            return Err(AssuranceError::NotSortedOrUniqueAssurers);
        }
        previous_index = Some(assurance.validator_index);

        if !ed25519::verify(
            &validator.ed25519,
            &assurance.signable_bytes(),
            &assurance.signature,
        ) {
            return Err(AssuranceError::BadSignature);
        }

        for core in assurance.cores() {
            let engaged = post
                .avail_assignments
                .get(core as usize)
                .is_some_and(|slot| slot.is_some());
            if !engaged {
                return Err(AssuranceError::CoreNotEngaged);
            }
        }
    }

    // Per-core tally across all assurances.
    let mut counts: std::collections::BTreeMap<u16, usize> = Default::default();
    for assurance in &input.assurances {
        for core in assurance.cores() {
            *counts.entry(core).or_default() += 1;
        }
    }

    let threshold = super_majority(post.kappa.len());
    let mut reported = Vec::new();
    for (core, count) in counts {
        if count >= threshold {
            if let Some(Some(assignment)) = post.avail_assignments.get(core as usize) {
                reported.push(assignment.report.clone());
                tracing::info!(core, count, "core availability reached super-majority");
            }
            // The assignment stays: downstream consumers read it for
            // accumulation and it is cleared by timeout or replacement.
        }
    }

    Ok((post, AssurancesOutput { reported }))
}
