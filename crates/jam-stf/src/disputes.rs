//! Dispute processing: verdicts, culprits and faults.
//!
//! A super-majority of negative judgements demotes the target report from the
//! pending set and the accumulation queue; already-finalized targets stay in
//! recent history (a late dispute is bookkeeping only). Culprit and fault
//! evidence adds validator keys to the offender set, which is also the
//! `offenders_mark` emitted in the header.

use std::collections::BTreeSet;

use jam_crypto::ed25519;
use jam_types::block::{Culprit, Disputes, Fault, Judgement, Verdict};
use jam_types::{epoch_and_phase, super_majority, ChainState, PublicKey, TimeSlot};

/// Header mark: the keys newly convicted this block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DisputesOutput {
    pub offenders_mark: Vec<PublicKey>,
}

/// Fatal dispute-extrinsic failures.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DisputeError {
    #[error("bad_judgement_age")]
    BadJudgementAge,

    #[error("bad_validator_index")]
    BadValidatorIndex,

    #[error("bad_signature")]
    BadSignature,

    #[error("offender_not_present")]
    OffenderNotPresent,

    #[error("not_a_bad_report")]
    NotABadReport,
}

/// Outcome of tallying one verdict's judgements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum VerdictOutcome {
    Good,
    Bad,
    Wonky,
}

fn tally(verdict: &Verdict, validator_count: usize) -> VerdictOutcome {
    let threshold = super_majority(validator_count);
    let positive = verdict.votes.iter().filter(|v| v.vote).count();
    let negative = verdict.votes.len() - positive;
    if positive >= threshold {
        VerdictOutcome::Good
    } else if negative >= threshold {
        VerdictOutcome::Bad
    } else {
        VerdictOutcome::Wonky
    }
}

/// Apply the dispute extrinsic.
pub fn apply(
    pre: &ChainState,
    disputes: &Disputes,
    current_slot: TimeSlot,
) -> Result<(ChainState, DisputesOutput), DisputeError> {
    let mut post = pre.clone();
    let mut newly_convicted: BTreeSet<PublicKey> = BTreeSet::new();

    if disputes.is_empty() {
        return Ok((post, DisputesOutput::default()));
    }

    let (current_epoch, _) = epoch_and_phase(current_slot, pre.epoch_length);

    for verdict in &disputes.verdicts {
        // The age selects which validator set judged the report.
        let judges = if verdict.age == current_epoch {
            &pre.kappa
        } else if current_epoch > 0 && verdict.age == current_epoch - 1 {
            &pre.lambda
        } else {
            return Err(DisputeError::BadJudgementAge);
        };

        for judgement in &verdict.votes {
            let judge = judges
                .get(judgement.index as usize)
                .ok_or(DisputeError::BadValidatorIndex)?;
            let payload = Judgement::signable_bytes(judgement.vote, &verdict.target);
            if !ed25519::verify(&judge.ed25519, &payload, &judgement.signature) {
                return Err(DisputeError::BadSignature);
            }
        }

        match tally(verdict, judges.len()) {
            VerdictOutcome::Good => {
                post.psi.good.insert(verdict.target);
            }
            VerdictOutcome::Bad => {
                demote(&mut post, verdict, current_slot);
            }
            VerdictOutcome::Wonky => {
                post.psi.wonky.insert(verdict.target);
            }
        }
    }

    // Culprits: guarantors of reports judged bad.
    for culprit in &disputes.culprits {
        verify_offender_evidence(
            pre,
            &post,
            &culprit.target,
            &culprit.key,
            &culprit.signable_bytes(),
            &culprit.signature,
        )?;
        if post.psi.offenders.insert(culprit.key) {
            newly_convicted.insert(culprit.key);
        }
        post.psi.bump_offender(culprit.key, current_slot);
    }

    // Faults: judges whose recorded vote contradicts the verdict.
    for fault in &disputes.faults {
        verify_offender_evidence(
            pre,
            &post,
            &fault.target,
            &fault.key,
            &fault.signable_bytes(),
            &fault.signature,
        )?;
        if post.psi.offenders.insert(fault.key) {
            newly_convicted.insert(fault.key);
        }
        post.psi.bump_offender(fault.key, current_slot);
    }

    let offenders_mark: Vec<PublicKey> = newly_convicted.into_iter().collect();
    if !offenders_mark.is_empty() {
        tracing::info!(offenders = offenders_mark.len(), "new offenders recorded");
    }

    Ok((post, DisputesOutput { offenders_mark }))
}

/// Remove a bad report from the live sets; finalized entries stay put.
fn demote(post: &mut ChainState, verdict: &Verdict, current_slot: TimeSlot) {
    let digest = verdict.target;

    let guarantor = post
        .rho
        .remove(&digest)
        .map(|entry| entry.report.guarantor_public_key)
        .or_else(|| post.omega.remove(&digest).map(|entry| entry.report.guarantor_public_key));

    if post.xi.contains(&digest) {
        tracing::debug!(%digest, "late dispute against finalized report");
        // Bookkeeping only: xi keeps the digest, so only the offender side
        // is updated. Recording it as bad would break set disjointness.
    } else {
        post.psi.record_bad(digest, "verdict", PublicKey::zero());
    }

    if let Some(guarantor) = guarantor {
        post.psi.bump_offender(guarantor, current_slot);
    }
}

/// Shared culprit/fault checks: the target must already be judged bad, the
/// key must belong to a known validator set, and the evidence signature must
/// verify.
fn verify_offender_evidence(
    pre: &ChainState,
    post: &ChainState,
    target: &jam_types::Hash,
    key: &PublicKey,
    payload: &[u8],
    signature: &jam_types::Signature,
) -> Result<(), DisputeError> {
    if !post.psi.bad.contains(target) && !post.xi.contains(target) {
        return Err(DisputeError::NotABadReport);
    }
    let known = pre
        .kappa
        .iter()
        .chain(pre.lambda.iter())
        .any(|validator| validator.ed25519 == *key);
    if !known {
        return Err(DisputeError::OffenderNotPresent);
    }
    if !ed25519::verify(key, payload, signature) {
        return Err(DisputeError::BadSignature);
    }
    Ok(())
}
