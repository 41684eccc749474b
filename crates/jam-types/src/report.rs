//! Work-reports and their on-chain bookkeeping entries.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::codec::{blake2b_256, Encoder};
use crate::primitives::{Hash, HexBytes, PublicKey, Signature};
use crate::{CoreIndex, EpochIndex, Gas, ServiceId, TimeSlot};

/// Work-package description carried inside a report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub hash: Hash,
    #[serde(default)]
    pub length: u32,
    #[serde(default)]
    pub erasure_root: Hash,
    pub exports_root: Hash,
    #[serde(default)]
    pub exports_count: u32,
}

/// Refinement context: where the work was anchored and who guaranteed it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementContext {
    pub anchor: Hash,
    pub anchor_slot: TimeSlot,
    pub lookup_anchor: Hash,
    pub lookup_anchor_slot: TimeSlot,
    #[serde(default)]
    pub prerequisites: Vec<Hash>,
    /// Guarantor assignment for the report's epoch and the one before it.
    #[serde(default)]
    pub current_guarantors: Vec<PublicKey>,
    #[serde(default)]
    pub previous_guarantors: Vec<PublicKey>,
    #[serde(default)]
    pub current_epoch: EpochIndex,
}

/// Execution result of a single work item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkExecResult {
    Ok(HexBytes),
    Err(String),
}

impl WorkExecResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, WorkExecResult::Ok(_))
    }
}

/// Per-service result entry of a report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkResult {
    pub service_id: ServiceId,
    #[serde(default)]
    pub code_hash: Hash,
    pub payload_hash: Hash,
    pub accumulate_gas: Gas,
    pub result: WorkExecResult,
}

/// Export-segment lookup entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRootLookup {
    pub work_package_hash: Hash,
    pub segment_tree_root: Hash,
}

/// A guaranteed work-report.
///
/// The report digest (see [`WorkReport::digest`]) is the canonical identity
/// used by the pending set, the accumulation queue, recent history and the
/// dispute ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkReport {
    pub package_spec: PackageSpec,
    pub context: RefinementContext,
    pub core_index: CoreIndex,
    pub authorizer_hash: Hash,
    pub results: Vec<WorkResult>,
    #[serde(default)]
    pub segment_root_lookup: Vec<SegmentRootLookup>,
    pub guarantor_public_key: PublicKey,
    pub guarantor_signature: Signature,
    pub slot: TimeSlot,
}

impl WorkReport {
    /// Canonical bytes of the report content, excluding the guarantor key
    /// and signature.
    ///
    /// This is both the signable form and the digest preimage: every
    /// guarantor of the same report signs identical bytes, so signatures
    /// accrue against one digest.
    pub fn signable_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::with_capacity(256);
        enc.fixed(self.package_spec.hash)
            .u32(self.package_spec.length)
            .fixed(self.package_spec.erasure_root)
            .fixed(self.package_spec.exports_root)
            .u32(self.package_spec.exports_count);
        enc.fixed(self.context.anchor)
            .u32(self.context.anchor_slot)
            .fixed(self.context.lookup_anchor)
            .u32(self.context.lookup_anchor_slot)
            .seq(&self.context.prerequisites, |e, h| {
                e.fixed(h);
            })
            .seq(&self.context.current_guarantors, |e, k| {
                e.fixed(k);
            })
            .seq(&self.context.previous_guarantors, |e, k| {
                e.fixed(k);
            })
            .u32(self.context.current_epoch);
        enc.u16(self.core_index).fixed(self.authorizer_hash);
        enc.seq(&self.results, |e, r| {
            e.u32(r.service_id)
                .fixed(r.code_hash)
                .fixed(r.payload_hash)
                .u64(r.accumulate_gas);
            match &r.result {
                WorkExecResult::Ok(out) => {
                    e.u8(0).bytes(out);
                }
                WorkExecResult::Err(reason) => {
                    e.u8(1).bytes(reason.as_bytes());
                }
            }
        });
        enc.seq(&self.segment_root_lookup, |e, s| {
            e.fixed(s.work_package_hash).fixed(s.segment_tree_root);
        });
        enc.u32(self.slot);
        enc.finish()
    }

    /// Report digest: the canonical id in rho/omega/xi/psi.
    pub fn digest(&self) -> Hash {
        blake2b_256(self.signable_bytes())
    }

    /// Digests this report depends on: context prerequisites plus
    /// segment-root lookups.
    pub fn dependencies(&self) -> impl Iterator<Item = &Hash> {
        self.context
            .prerequisites
            .iter()
            .chain(self.segment_root_lookup.iter().map(|s| &s.work_package_hash))
    }

    /// Total gas consumed across result items.
    pub fn gas_used(&self) -> Gas {
        self.results.iter().map(|r| r.accumulate_gas).sum()
    }
}

/// Entry in the pending set (rho): a report collecting guarantor signatures.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingReport {
    pub report: WorkReport,
    pub received_signatures: BTreeSet<PublicKey>,
    pub submission_slot: TimeSlot,
}

/// Status of an accumulation-queue entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Ready,
    Processing,
}

/// Entry in the accumulation queue (omega).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub report: WorkReport,
    pub status: QueueStatus,
}

/// Per-core availability slot: a report awaiting assurances, or nothing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailAssignment {
    pub report: WorkReport,
    pub timeout: TimeSlot,
}

/// Work-package summary recorded in a history (beta) entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedPackage {
    pub hash: Hash,
    pub exports_root: Hash,
}


#[cfg(test)]
mod tests {
    use super::test_fixtures::report;
    use super::*;

    #[test]
    fn digest_ignores_guarantor_identity() {
        let mut a = report(0, 1);
        let d1 = a.digest();
        a.guarantor_signature = Signature::from_bytes([0xee; 64]);
        a.guarantor_public_key = PublicKey::from_bytes([0xdd; 32]);
        assert_eq!(a.digest(), d1);
    }

    #[test]
    fn digest_distinguishes_reports() {
        assert_ne!(report(0, 1).digest(), report(0, 2).digest());
        assert_ne!(report(0, 1).digest(), report(1, 1).digest());
    }

    #[test]
    fn dependencies_include_segment_lookups() {
        let mut r = report(0, 1);
        r.context.prerequisites = vec![Hash::from_bytes([5; 32])];
        r.segment_root_lookup = vec![SegmentRootLookup {
            work_package_hash: Hash::from_bytes([6; 32]),
            segment_tree_root: Hash::zero(),
        }];
        let deps: Vec<_> = r.dependencies().copied().collect();
        assert_eq!(deps, vec![Hash::from_bytes([5; 32]), Hash::from_bytes([6; 32])]);
    }

    #[test]
    fn wire_round_trip() {
        let r = report(3, 7);
        let json = serde_json::to_string(&r).unwrap();
        let back: WorkReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
        assert_eq!(back.digest(), r.digest());
    }
}
