//! Guarantees processing: work-report admission, signature accrual,
//! promotion into the accumulation queue, and timeout eviction.
//!
//! Per-report validation failures are protocol errors: the offending report
//! is recorded in the bad set with its reason, the guarantor's dispute
//! counter is bumped, and processing continues with the next report. The STF
//! itself only fails on internal inconsistency, never on bad input reports.

use std::collections::BTreeSet;

use jam_crypto::ed25519;
use jam_types::report::{PendingReport, QueueEntry, QueueStatus, WorkReport};
use jam_types::{
    epoch_and_phase, guarantor_threshold, ChainState, Hash, TimeSlot,
};

use crate::constants::{
    ANCHOR_MAX_AGE_SLOTS, MAX_DEPENDENCIES, MAX_WORK_REPORT_GAS, MIN_SERVICE_ITEM_GAS,
    REPORT_TIMEOUT_SLOTS,
};

/// Why a single report was refused; names are the wire-facing reasons
/// recorded in the bad-report ledger.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ReportError {
    #[error("bad_signature")]
    BadSignature,

    #[error("anchor_not_recent")]
    AnchorNotRecent,

    #[error("bad_service_id")]
    BadServiceId,

    #[error("bad_code_hash")]
    BadCodeHash,

    #[error("wrong_assignment")]
    WrongAssignment,

    #[error("core_engaged")]
    CoreEngaged,

    #[error("future_report_slot")]
    FutureReportSlot,

    #[error("report_before_last_rotation")]
    ReportBeforeLastRotation,

    #[error("too_many_dependencies")]
    TooManyDependencies,

    #[error("dependency_missing")]
    DependencyMissing,

    #[error("too_high_work_report_gas")]
    TooHighWorkReportGas,

    #[error("service_item_gas_too_low")]
    ServiceItemGasTooLow,

    #[error("duplicate_package_in_recent_history")]
    DuplicatePackageInRecentHistory,
}

/// What happened to each submitted report.
#[derive(Clone, Debug, Default)]
pub struct GuaranteesOutput {
    /// Digests newly added to the pending set or with a fresh signature.
    pub admitted: Vec<Hash>,
    /// Digests promoted to the accumulation queue this block.
    pub promoted: Vec<Hash>,
    /// Digests refused, with the reason recorded in the ledger.
    pub rejected: Vec<(Hash, ReportError)>,
    /// Pending digests evicted by timeout.
    pub timed_out: Vec<Hash>,
}

fn validate_report(
    report: &WorkReport,
    state: &ChainState,
    current_slot: TimeSlot,
    block_digests: &BTreeSet<Hash>,
) -> Result<(), ReportError> {
    if !ed25519::verify(
        &report.guarantor_public_key,
        &report.signable_bytes(),
        &report.guarantor_signature,
    ) {
        return Err(ReportError::BadSignature);
    }

    if current_slot.saturating_sub(report.context.anchor_slot) > ANCHOR_MAX_AGE_SLOTS {
        return Err(ReportError::AnchorNotRecent);
    }

    for result in &report.results {
        let account =
            state.accounts.get(&result.service_id).ok_or(ReportError::BadServiceId)?;
        if let Some(expected) = account.code_hash {
            if result.code_hash != expected {
                return Err(ReportError::BadCodeHash);
            }
        }
    }

    // The guarantor must be assigned for the report's epoch, judged against
    // the assignment snapshot the report itself carries.
    let (report_epoch, _) = epoch_and_phase(report.slot, state.epoch_length);
    let assigned = (report_epoch == report.context.current_epoch
        && report.context.current_guarantors.contains(&report.guarantor_public_key))
        || (report.context.current_epoch > 0
            && report_epoch == report.context.current_epoch - 1
            && report.context.previous_guarantors.contains(&report.guarantor_public_key));
    if !assigned {
        return Err(ReportError::WrongAssignment);
    }

    if state
        .avail_assignments
        .get(report.core_index as usize)
        .is_some_and(|slot| slot.is_some())
    {
        return Err(ReportError::CoreEngaged);
    }

    if report.slot > current_slot {
        return Err(ReportError::FutureReportSlot);
    }
    if current_slot - report.slot > REPORT_TIMEOUT_SLOTS {
        return Err(ReportError::ReportBeforeLastRotation);
    }

    let dependencies: Vec<&Hash> = report.dependencies().collect();
    if dependencies.len() > MAX_DEPENDENCIES {
        return Err(ReportError::TooManyDependencies);
    }
    for dep in dependencies {
        let met = state.xi.contains(dep)
            || state.rho.contains_key(dep)
            || block_digests.contains(dep);
        if !met {
            return Err(ReportError::DependencyMissing);
        }
    }

    if report.gas_used() > MAX_WORK_REPORT_GAS {
        return Err(ReportError::TooHighWorkReportGas);
    }
    if report.results.iter().any(|r| r.accumulate_gas < MIN_SERVICE_ITEM_GAS) {
        return Err(ReportError::ServiceItemGasTooLow);
    }

    if state.xi.contains(&report.digest()) {
        return Err(ReportError::DuplicatePackageInRecentHistory);
    }

    Ok(())
}

/// Apply the guarantees extrinsic.
pub fn apply(
    pre: &ChainState,
    reports: &[WorkReport],
    current_slot: TimeSlot,
) -> (ChainState, GuaranteesOutput) {
    let mut post = pre.clone();
    let mut output = GuaranteesOutput::default();

    // Digests submitted in this block may satisfy each other's dependencies.
    let block_digests: BTreeSet<Hash> = reports.iter().map(|r| r.digest()).collect();

    for report in reports {
        let digest = report.digest();

        if let Err(reason) = validate_report(report, &post, current_slot, &block_digests) {
            tracing::debug!(%digest, %reason, "work-report refused");
            if !post.xi.contains(&digest) && !post.omega.contains_key(&digest) {
                post.rho.remove(&digest);
                post.psi.record_bad(digest, reason.to_string(), report.guarantor_public_key);
            }
            post.psi.bump_offender(report.guarantor_public_key, current_slot);
            output.rejected.push((digest, reason));
            continue;
        }

        let entry = post.rho.entry(digest).or_insert_with(|| PendingReport {
            report: report.clone(),
            received_signatures: BTreeSet::new(),
            submission_slot: current_slot,
        });
        // Duplicate signatures from the same guarantor are ignored.
        entry.received_signatures.insert(report.guarantor_public_key);
        output.admitted.push(digest);

        let total_guarantors = report.context.current_guarantors.len()
            + report.context.previous_guarantors.len();
        let required = guarantor_threshold(total_guarantors);

        if entry.received_signatures.len() >= required {
            let entry = post.rho.remove(&digest).expect("entry inserted above");
            post.omega
                .insert(digest, QueueEntry { report: entry.report, status: QueueStatus::Ready });
            output.promoted.push(digest);
            tracing::info!(%digest, signatures = required, "report promoted to accumulation queue");
        }
    }

    // Timeout sweep over the pending set.
    let stale: Vec<Hash> = post
        .rho
        .iter()
        .filter(|(_, entry)| {
            current_slot.saturating_sub(entry.submission_slot) > REPORT_TIMEOUT_SLOTS
        })
        .map(|(digest, _)| *digest)
        .collect();
    for digest in stale {
        let entry = post.rho.remove(&digest).expect("digest from iteration above");
        post.psi.record_bad(digest, "timed_out", entry.report.guarantor_public_key);
        output.timed_out.push(digest);
        tracing::debug!(%digest, "pending report timed out");
    }

    (post, output)
}

#[cfg(test)]
mod tests {
    use jam_types::state::ServiceAccount;
    use jam_types::PublicKey;

    use crate::test_support::{chain, report, sign_report, TestChain};

    use super::*;

    /// Three-guarantor chain where every guarantor is assigned for epoch 0
    /// and service 0 exists.
    fn setup() -> TestChain {
        let mut c = chain(3);
        c.state.accounts.insert(0, ServiceAccount::default());
        c
    }

    fn guaranteed(set: &TestChain, signer: usize, tag: u8) -> WorkReport {
        let mut r = report(0, tag);
        r.context.current_guarantors =
            set.keys.iter().map(jam_crypto::ed25519::verifying_key_bytes).collect();
        sign_report(&mut r, &set.keys[signer]);
        r
    }

    #[test]
    fn unsigned_report_recorded_as_bad() {
        let set = setup();
        let mut r = report(0, 1);
        r.context.current_guarantors = vec![PublicKey::from_bytes([9; 32])];

        let (post, out) = apply(&set.state, &[r.clone()], 1);
        assert_eq!(out.rejected, vec![(r.digest(), ReportError::BadSignature)]);
        assert!(post.psi.bad.contains(&r.digest()));
        assert!(post.rho.is_empty());
        assert_eq!(post.psi.records[&r.guarantor_public_key].dispute_count, 1);
    }

    // Scenario: one valid signature admits the report to the pending set;
    // two more distinct guarantor signatures promote it.
    #[test]
    fn promotion_at_two_thirds() {
        let set = setup();

        let first = guaranteed(&set, 0, 1);
        let digest = first.digest();
        let (post, out) = apply(&set.state, &[first], 1);
        assert_eq!(out.admitted, vec![digest]);
        assert!(out.promoted.is_empty());
        assert_eq!(post.rho[&digest].received_signatures.len(), 1);

        let second = guaranteed(&set, 1, 1);
        let (post, out) = apply(&post, &[second], 2);
        // threshold for 3 guarantors is 2: promoted on the second signature
        assert_eq!(out.promoted, vec![digest]);
        assert!(!post.rho.contains_key(&digest));
        assert_eq!(post.omega[&digest].status, QueueStatus::Ready);
        post.check_invariants().unwrap();
    }

    #[test]
    fn duplicate_signature_is_ignored() {
        let set = setup();
        let r = guaranteed(&set, 0, 1);
        let digest = r.digest();
        let (post, _) = apply(&set.state, &[r.clone()], 1);
        let (post, out) = apply(&post, &[r], 2);
        assert_eq!(post.rho[&digest].received_signatures.len(), 1);
        assert!(out.promoted.is_empty());
    }

    #[test]
    fn stale_anchor_rejected() {
        let set = setup();
        let mut r = report(0, 1);
        r.context.anchor_slot = 0;
        r.slot = 30;
        r.context.current_guarantors =
            set.keys.iter().map(jam_crypto::ed25519::verifying_key_bytes).collect();
        sign_report(&mut r, &set.keys[0]);

        let (_, out) = apply(&set.state, &[r], 30);
        assert_eq!(out.rejected[0].1, ReportError::AnchorNotRecent);
    }

    #[test]
    fn unknown_service_rejected() {
        let mut set = setup();
        set.state.accounts.clear();
        let r = guaranteed(&set, 0, 1);
        let (_, out) = apply(&set.state, &[r], 1);
        assert_eq!(out.rejected[0].1, ReportError::BadServiceId);
    }

    #[test]
    fn code_hash_mismatch_rejected() {
        let mut set = setup();
        set.state.accounts.get_mut(&0).unwrap().code_hash =
            Some(jam_types::Hash::from_bytes([0xcc; 32]));
        let r = guaranteed(&set, 0, 1);
        let (_, out) = apply(&set.state, &[r], 1);
        assert_eq!(out.rejected[0].1, ReportError::BadCodeHash);
    }

    #[test]
    fn unassigned_guarantor_rejected() {
        let set = setup();
        let mut r = report(0, 1);
        // signed, but signer is not in the guarantor set
        sign_report(&mut r, &set.keys[0]);
        let mut r2 = r.clone();
        r2.context.current_guarantors = vec![PublicKey::from_bytes([0xdd; 32])];
        sign_report(&mut r2, &set.keys[0]);

        let (_, out) = apply(&set.state, &[r2], 1);
        assert_eq!(out.rejected[0].1, ReportError::WrongAssignment);
    }

    #[test]
    fn engaged_core_rejected() {
        let mut set = setup();
        set.state.avail_assignments = vec![Some(jam_types::report::AvailAssignment {
            report: report(0, 9),
            timeout: 100,
        })];
        let r = guaranteed(&set, 0, 1);
        let (_, out) = apply(&set.state, &[r], 1);
        assert_eq!(out.rejected[0].1, ReportError::CoreEngaged);
    }

    #[test]
    fn future_slot_rejected() {
        let set = setup();
        let mut r = report(0, 1);
        r.slot = 10;
        r.context.current_guarantors =
            set.keys.iter().map(jam_crypto::ed25519::verifying_key_bytes).collect();
        sign_report(&mut r, &set.keys[0]);
        let (_, out) = apply(&set.state, &[r], 5);
        assert_eq!(out.rejected[0].1, ReportError::FutureReportSlot);
    }

    #[test]
    fn missing_dependency_rejected() {
        let set = setup();
        let mut r = report(0, 1);
        r.context.prerequisites = vec![jam_types::Hash::from_bytes([0xee; 32])];
        r.context.current_guarantors =
            set.keys.iter().map(jam_crypto::ed25519::verifying_key_bytes).collect();
        sign_report(&mut r, &set.keys[0]);
        let (_, out) = apply(&set.state, &[r], 1);
        assert_eq!(out.rejected[0].1, ReportError::DependencyMissing);
    }

    #[test]
    fn dependency_on_same_block_accepted() {
        let set = setup();
        let base = guaranteed(&set, 0, 1);
        let mut dependent = report(1, 2);
        dependent.context.prerequisites = vec![base.digest()];
        dependent.context.current_guarantors =
            set.keys.iter().map(jam_crypto::ed25519::verifying_key_bytes).collect();
        sign_report(&mut dependent, &set.keys[0]);

        let (_, out) = apply(&set.state, &[base, dependent], 1);
        assert_eq!(out.rejected, vec![]);
        assert_eq!(out.admitted.len(), 2);
    }

    #[test]
    fn gas_bounds_enforced() {
        let set = setup();

        let mut heavy = report(0, 1);
        heavy.results[0].accumulate_gas = MAX_WORK_REPORT_GAS + 1;
        heavy.context.current_guarantors =
            set.keys.iter().map(jam_crypto::ed25519::verifying_key_bytes).collect();
        sign_report(&mut heavy, &set.keys[0]);
        let (_, out) = apply(&set.state, &[heavy], 1);
        assert_eq!(out.rejected[0].1, ReportError::TooHighWorkReportGas);

        let mut light = report(0, 2);
        light.results[0].accumulate_gas = MIN_SERVICE_ITEM_GAS - 1;
        light.context.current_guarantors =
            set.keys.iter().map(jam_crypto::ed25519::verifying_key_bytes).collect();
        sign_report(&mut light, &set.keys[0]);
        let (_, out) = apply(&set.state, &[light], 1);
        assert_eq!(out.rejected[0].1, ReportError::ServiceItemGasTooLow);
    }

    #[test]
    fn finalized_duplicate_rejected() {
        let set = setup();
        let r = guaranteed(&set, 0, 1);
        let mut state = set.state.clone();
        state.xi.insert(r.digest());
        let (post, out) = apply(&state, &[r.clone()], 1);
        assert_eq!(out.rejected[0].1, ReportError::DuplicatePackageInRecentHistory);
        // the digest stays in xi only; disjointness holds
        assert!(!post.psi.bad.contains(&r.digest()));
        post.check_invariants().unwrap();
    }

    #[test]
    fn pending_timeout_evicts() {
        let set = setup();
        let r = guaranteed(&set, 0, 1);
        let digest = r.digest();
        let (post, _) = apply(&set.state, &[r], 1);
        assert!(post.rho.contains_key(&digest));

        let (post, out) = apply(&post, &[], 10);
        assert_eq!(out.timed_out, vec![digest]);
        assert!(!post.rho.contains_key(&digest));
        assert!(post.psi.bad.contains(&digest));
        assert_eq!(post.psi.bad_records[&digest].reason, "timed_out");
    }
}
