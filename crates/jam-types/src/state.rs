//! The canonical chain state shared by every state-transition function.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::primitives::{Hash, HexBytes, PublicKey};
use crate::report::{AvailAssignment, PendingReport, QueueEntry, ReportedPackage};
use crate::validator::ValidatorRecord;
use crate::{ServiceId, TimeSlot};

/// A submitted next-epoch ticket held in the accumulator (`gamma_a`).
///
/// Sorted strictly by `randomness`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub attempt: u8,
    pub randomness: Hash,
    pub proof: HexBytes,
}

/// Seal-key sequence for the current epoch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SealKeys {
    /// Fully-ticketed epoch: one winning ticket per slot.
    Tickets(Vec<crate::block::TicketId>),
    /// Fallback: bandersnatch keys drawn from the active set.
    Keys(Vec<PublicKey>),
}

impl Default for SealKeys {
    fn default() -> Self {
        SealKeys::Keys(Vec::new())
    }
}

/// Why a report digest landed in the bad set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadReportRecord {
    pub reason: String,
    pub disputed_by: BTreeSet<PublicKey>,
}

/// Running dispute tally against one validator key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffenderRecord {
    pub dispute_count: u32,
    pub last_dispute_slot: TimeSlot,
}

/// Dispute ledger (`psi`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeLedger {
    pub good: BTreeSet<Hash>,
    pub bad: BTreeSet<Hash>,
    pub wonky: BTreeSet<Hash>,
    /// Offending validator ed25519 keys; sorted and unique by construction.
    pub offenders: BTreeSet<PublicKey>,
    /// Evidence for bad digests.
    #[serde(default)]
    pub bad_records: BTreeMap<Hash, BadReportRecord>,
    /// Per-key dispute counters.
    #[serde(default)]
    pub records: BTreeMap<PublicKey, OffenderRecord>,
}

impl DisputeLedger {
    /// Record a digest as bad with a reason and an accusing party.
    pub fn record_bad(&mut self, digest: Hash, reason: impl Into<String>, accuser: PublicKey) {
        self.bad.insert(digest);
        let record = self.bad_records.entry(digest).or_insert_with(|| BadReportRecord {
            reason: reason.into(),
            disputed_by: BTreeSet::new(),
        });
        record.disputed_by.insert(accuser);
    }

    /// Bump the dispute counter for a validator key.
    pub fn bump_offender(&mut self, key: PublicKey, slot: TimeSlot) {
        let record = self.records.entry(key).or_default();
        record.dispute_count += 1;
        record.last_dispute_slot = slot;
    }
}

/// Compact Merkle Mountain Range digest stored in history entries.
///
/// `peaks[h]` holds the peak of height `h`, if any; `count` is the number of
/// appended leaves. The append rule lives in `jam-merkle`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MmrPeaks {
    pub peaks: Vec<Option<Hash>>,
    pub count: u64,
}

/// One recent-history (`beta`) entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetaBlock {
    pub header_hash: Hash,
    pub state_root: Hash,
    pub mmr: MmrPeaks,
    pub reported: Vec<ReportedPackage>,
}

/// Lookup-meta key: a solicited preimage is identified by hash and length.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LookupKey {
    pub hash: Hash,
    pub length: u32,
}

/// Lookup-meta entry: the slots at which the preimage was provided.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupEntry {
    pub key: LookupKey,
    pub value: Vec<TimeSlot>,
}

/// On-chain service account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccount {
    /// Provided preimages, keyed by blake2b-256 of the blob.
    pub preimages: BTreeMap<Hash, HexBytes>,
    /// Solicited preimage slots, with provision history.
    pub lookup_meta: Vec<LookupEntry>,
    /// Expected code hash for work results of this service, when pinned.
    #[serde(default)]
    pub code_hash: Option<Hash>,
}

impl ServiceAccount {
    pub fn lookup_entry_mut(&mut self, key: &LookupKey) -> Option<&mut LookupEntry> {
        self.lookup_meta.iter_mut().find(|e| e.key == *key)
    }

    pub fn is_solicited(&self, key: &LookupKey) -> bool {
        self.lookup_meta.iter().any(|e| e.key == *key)
    }
}

/// Per-validator activity counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorStats {
    pub blocks: u64,
    pub tickets: u64,
    pub pre_images: u64,
    pub pre_images_size: u64,
    pub guarantees: u64,
    pub assurances: u64,
}

/// Per-service activity counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub provided_count: u64,
    pub provided_size: u64,
}

/// Activity statistics for validators and services.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub validators: Vec<ValidatorStats>,
    pub services: BTreeMap<ServiceId, ServiceStats>,
}

impl Statistics {
    pub fn with_validators(n: usize) -> Self {
        Self { validators: vec![ValidatorStats::default(); n], services: BTreeMap::new() }
    }

    pub fn validator_mut(&mut self, index: usize) -> Option<&mut ValidatorStats> {
        self.validators.get_mut(index)
    }

    pub fn service_mut(&mut self, id: ServiceId) -> &mut ServiceStats {
        self.services.entry(id).or_default()
    }
}

/// The canonical state operated on by the STF pipeline.
///
/// Field order fixes the state-trie chapter indices (1-based), so new fields
/// append at the end.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    /// Current timeslot.
    pub tau: TimeSlot,
    /// Entropy accumulators `[eta0, eta1, eta2, eta3]`.
    pub eta: [Hash; 4],
    /// Next-epoch candidate validators.
    pub iota: Vec<ValidatorRecord>,
    /// Staged validator set for the upcoming epoch.
    pub gamma_k: Vec<ValidatorRecord>,
    /// Active validator set.
    pub kappa: Vec<ValidatorRecord>,
    /// Previous-epoch validator set.
    pub lambda: Vec<ValidatorRecord>,
    /// Submitted next-epoch tickets, sorted by randomness.
    pub gamma_a: Vec<Ticket>,
    /// Seal-key sequence for the current epoch.
    pub gamma_s: SealKeys,
    /// Ring-VRF commitment to `gamma_k`.
    pub gamma_z: HexBytes,
    /// Dispute ledger.
    pub psi: DisputeLedger,
    /// Offenders applied when the next validator set is staged.
    pub post_offenders: BTreeSet<PublicKey>,
    /// Pending work-reports, keyed by digest.
    pub rho: BTreeMap<Hash, PendingReport>,
    /// Accumulation queue, keyed by digest.
    pub omega: BTreeMap<Hash, QueueEntry>,
    /// Finalized report digests (recent history).
    pub xi: BTreeSet<Hash>,
    /// Per-core availability slots.
    pub avail_assignments: Vec<Option<AvailAssignment>>,
    /// Recent block history, oldest first, at most [`ChainState::BETA_LIMIT`].
    pub beta: Vec<BetaBlock>,
    /// Service accounts.
    pub accounts: BTreeMap<ServiceId, ServiceAccount>,
    /// Activity statistics.
    pub statistics: Statistics,
    /// Epoch length in slots.
    #[serde(rename = "E")]
    pub epoch_length: u32,
    /// Ticket-submission cutoff phase.
    #[serde(rename = "Y")]
    pub ticket_cutoff: u32,
    /// Ticket attempts allowed per validator.
    #[serde(rename = "N")]
    pub ticket_attempts: u8,
}

/// A broken canonical invariant; produced by [`ChainState::check_invariants`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("gamma_a not strictly sorted by randomness")]
    TicketsUnsorted,

    #[error("gamma_a over capacity: {0} tickets, epoch length {1}")]
    TicketsOverCapacity(usize, u32),

    #[error("digest {0} present in more than one of rho/omega/xi/psi.bad")]
    DigestSetsOverlap(Hash),

    #[error("beta has {0} entries, limit is 8")]
    BetaOverflow(usize),

    #[error("stale availability assignment on core {0}")]
    StaleAssignment(usize),

    #[error("validator list {0} has {1} entries, expected {2}")]
    ValidatorSetSize(&'static str, usize, usize),
}

impl ChainState {
    /// Maximum retained history entries.
    pub const BETA_LIMIT: usize = 8;

    /// Tiny-profile genesis: the given validators active in every role,
    /// fallback seal keys, zeroed entropy.
    pub fn genesis(validators: Vec<ValidatorRecord>, epoch_length: u32, ticket_cutoff: u32, ticket_attempts: u8) -> Self {
        let n = validators.len();
        Self {
            tau: 0,
            eta: [Hash::zero(); 4],
            iota: validators.clone(),
            gamma_k: validators.clone(),
            kappa: validators.clone(),
            lambda: validators,
            gamma_a: Vec::new(),
            gamma_s: SealKeys::default(),
            gamma_z: HexBytes::default(),
            psi: DisputeLedger::default(),
            post_offenders: BTreeSet::new(),
            rho: BTreeMap::new(),
            omega: BTreeMap::new(),
            xi: BTreeSet::new(),
            avail_assignments: Vec::new(),
            beta: Vec::new(),
            accounts: BTreeMap::new(),
            statistics: Statistics::with_validators(n),
            epoch_length,
            ticket_cutoff,
            ticket_attempts,
        }
    }

    /// Number of validators in the active set.
    pub fn validator_count(&self) -> usize {
        self.kappa.len()
    }

    /// Check the canonical invariants that must hold at every STF boundary.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for pair in self.gamma_a.windows(2) {
            if pair[0].randomness >= pair[1].randomness {
                return Err(InvariantViolation::TicketsUnsorted);
            }
        }
        if self.gamma_a.len() > self.epoch_length as usize {
            return Err(InvariantViolation::TicketsOverCapacity(
                self.gamma_a.len(),
                self.epoch_length,
            ));
        }

        let mut seen: BTreeSet<&Hash> = BTreeSet::new();
        for digest in self
            .rho
            .keys()
            .chain(self.omega.keys())
            .chain(self.xi.iter())
            .chain(self.psi.bad.iter())
        {
            if !seen.insert(digest) {
                return Err(InvariantViolation::DigestSetsOverlap(*digest));
            }
        }

        if self.beta.len() > Self::BETA_LIMIT {
            return Err(InvariantViolation::BetaOverflow(self.beta.len()));
        }

        for (core, slot) in self.avail_assignments.iter().enumerate() {
            if let Some(assignment) = slot {
                if assignment.timeout < self.tau {
                    return Err(InvariantViolation::StaleAssignment(core));
                }
            }
        }

        let expected = self.kappa.len();
        for (name, list) in [
            ("iota", &self.iota),
            ("gamma_k", &self.gamma_k),
            ("lambda", &self.lambda),
        ] {
            if list.len() != expected {
                return Err(InvariantViolation::ValidatorSetSize(name, list.len(), expected));
            }
        }

        Ok(())
    }
}
