//! Canonical state serialization into trie key/value pairs.
//!
//! Each top-level state field is encoded with the canonical byte writers and
//! keyed by its chapter index (declaration order in `ChainState`, 1-based);
//! service accounts get their own keys under the 255 chapter byte.

use std::collections::BTreeMap;

use jam_types::codec::Encoder;
use jam_types::state::{SealKeys, ServiceAccount};
use jam_types::{ChainState, Hash};

use crate::trie::{chapter_key, service_key, trie_root, StateKey};

mod chapter {
    pub const TAU: u8 = 1;
    pub const ETA: u8 = 2;
    pub const IOTA: u8 = 3;
    pub const GAMMA_K: u8 = 4;
    pub const KAPPA: u8 = 5;
    pub const LAMBDA: u8 = 6;
    pub const GAMMA_A: u8 = 7;
    pub const GAMMA_S: u8 = 8;
    pub const GAMMA_Z: u8 = 9;
    pub const PSI: u8 = 10;
    pub const POST_OFFENDERS: u8 = 11;
    pub const RHO: u8 = 12;
    pub const OMEGA: u8 = 13;
    pub const XI: u8 = 14;
    pub const AVAIL: u8 = 15;
    pub const BETA: u8 = 16;
    pub const STATISTICS: u8 = 17;
    pub const PARAMS: u8 = 18;
}

fn validator_set_bytes(validators: &[jam_types::ValidatorRecord]) -> Vec<u8> {
    let mut enc = Encoder::with_capacity(validators.len() * 336);
    enc.seq(validators, |e, v| v.encode_into(e));
    enc.finish()
}

fn account_bytes(account: &ServiceAccount) -> Vec<u8> {
    let mut enc = Encoder::new();
    let preimages: Vec<_> = account.preimages.iter().collect();
    enc.seq(&preimages, |e, (hash, blob)| {
        e.fixed(*hash).bytes(blob);
    });
    enc.seq(&account.lookup_meta, |e, entry| {
        e.fixed(entry.key.hash).u32(entry.key.length).seq(&entry.value, |e, slot| {
            e.u32(*slot);
        });
    });
    enc.opt_fixed(account.code_hash.as_ref());
    enc.finish()
}

/// Flatten the canonical state into trie entries.
pub fn state_entries(state: &ChainState) -> BTreeMap<StateKey, Vec<u8>> {
    let mut entries = BTreeMap::new();

    let mut put = |chapter: u8, value: Vec<u8>| {
        entries.insert(chapter_key(chapter), value);
    };

    put(chapter::TAU, {
        let mut e = Encoder::new();
        e.u32(state.tau);
        e.finish()
    });

    put(chapter::ETA, {
        let mut e = Encoder::with_capacity(128);
        for eta in &state.eta {
            e.fixed(eta);
        }
        e.finish()
    });

    put(chapter::IOTA, validator_set_bytes(&state.iota));
    put(chapter::GAMMA_K, validator_set_bytes(&state.gamma_k));
    put(chapter::KAPPA, validator_set_bytes(&state.kappa));
    put(chapter::LAMBDA, validator_set_bytes(&state.lambda));

    put(chapter::GAMMA_A, {
        let mut e = Encoder::new();
        e.seq(&state.gamma_a, |e, t| {
            e.u8(t.attempt).fixed(t.randomness).bytes(&t.proof);
        });
        e.finish()
    });

    put(chapter::GAMMA_S, {
        let mut e = Encoder::new();
        match &state.gamma_s {
            SealKeys::Tickets(tickets) => {
                e.u8(0).seq(tickets, |e, t| {
                    e.fixed(t.id).u8(t.attempt);
                });
            }
            SealKeys::Keys(keys) => {
                e.u8(1).seq(keys, |e, k| {
                    e.fixed(k);
                });
            }
        }
        e.finish()
    });

    put(chapter::GAMMA_Z, {
        let mut e = Encoder::new();
        e.bytes(&state.gamma_z);
        e.finish()
    });

    put(chapter::PSI, {
        let mut e = Encoder::new();
        for set in [&state.psi.good, &state.psi.bad, &state.psi.wonky] {
            let digests: Vec<_> = set.iter().collect();
            e.seq(&digests, |e, d| {
                e.fixed(**d);
            });
        }
        let offenders: Vec<_> = state.psi.offenders.iter().collect();
        e.seq(&offenders, |e, k| {
            e.fixed(**k);
        });
        let bad_records: Vec<_> = state.psi.bad_records.iter().collect();
        e.seq(&bad_records, |e, (digest, record)| {
            e.fixed(*digest).bytes(record.reason.as_bytes());
            let accusers: Vec<_> = record.disputed_by.iter().collect();
            e.seq(&accusers, |e, k| {
                e.fixed(**k);
            });
        });
        let records: Vec<_> = state.psi.records.iter().collect();
        e.seq(&records, |e, (key, record)| {
            e.fixed(*key).u32(record.dispute_count).u32(record.last_dispute_slot);
        });
        e.finish()
    });

    put(chapter::POST_OFFENDERS, {
        let mut e = Encoder::new();
        let offenders: Vec<_> = state.post_offenders.iter().collect();
        e.seq(&offenders, |e, k| {
            e.fixed(**k);
        });
        e.finish()
    });

    put(chapter::RHO, {
        let mut e = Encoder::new();
        let pending: Vec<_> = state.rho.iter().collect();
        e.seq(&pending, |e, (digest, entry)| {
            e.fixed(*digest)
                .bytes(entry.report.signable_bytes())
                .fixed(entry.report.guarantor_public_key)
                .fixed(entry.report.guarantor_signature)
                .u32(entry.submission_slot);
            let signers: Vec<_> = entry.received_signatures.iter().collect();
            e.seq(&signers, |e, s| {
                e.fixed(**s);
            });
        });
        e.finish()
    });

    put(chapter::OMEGA, {
        let mut e = Encoder::new();
        let queued: Vec<_> = state.omega.iter().collect();
        e.seq(&queued, |e, (digest, entry)| {
            e.fixed(*digest).u8(entry.status as u8).bytes(entry.report.signable_bytes());
        });
        e.finish()
    });

    put(chapter::XI, {
        let mut e = Encoder::new();
        let finalized: Vec<_> = state.xi.iter().collect();
        e.seq(&finalized, |e, d| {
            e.fixed(**d);
        });
        e.finish()
    });

    put(chapter::AVAIL, {
        let mut e = Encoder::new();
        e.seq(&state.avail_assignments, |e, slot| match slot {
            Some(assignment) => {
                e.u8(1).bytes(assignment.report.signable_bytes()).u32(assignment.timeout);
            }
            None => {
                e.u8(0);
            }
        });
        e.finish()
    });

    put(chapter::BETA, {
        let mut e = Encoder::new();
        e.seq(&state.beta, |e, entry| {
            e.fixed(entry.header_hash).fixed(entry.state_root).u64(entry.mmr.count);
            e.seq(&entry.mmr.peaks, |e, peak| {
                e.opt_fixed(peak.as_ref());
            });
            e.seq(&entry.reported, |e, r| {
                e.fixed(r.hash).fixed(r.exports_root);
            });
        });
        e.finish()
    });

    put(chapter::STATISTICS, {
        let mut e = Encoder::new();
        e.seq(&state.statistics.validators, |e, v| {
            e.u64(v.blocks)
                .u64(v.tickets)
                .u64(v.pre_images)
                .u64(v.pre_images_size)
                .u64(v.guarantees)
                .u64(v.assurances);
        });
        let services: Vec<_> = state.statistics.services.iter().collect();
        e.seq(&services, |e, (id, s)| {
            e.u32(**id).u64(s.provided_count).u64(s.provided_size);
        });
        e.finish()
    });

    put(chapter::PARAMS, {
        let mut e = Encoder::new();
        e.u32(state.epoch_length).u32(state.ticket_cutoff).u8(state.ticket_attempts);
        e.finish()
    });

    for (service, account) in &state.accounts {
        entries.insert(service_key(*service), account_bytes(account));
    }

    entries
}

/// The state root: trie root over [`state_entries`].
pub fn state_root(state: &ChainState) -> Hash {
    trie_root(&state_entries(state))
}

#[cfg(test)]
mod tests {
    use jam_types::report::{AvailAssignment, PendingReport};
    use jam_types::state::{LookupEntry, LookupKey, Ticket};
    use jam_types::{HexBytes, PublicKey, ValidatorRecord};

    use super::*;

    fn validator(tag: u8) -> ValidatorRecord {
        ValidatorRecord {
            bandersnatch: PublicKey::from_bytes([tag; 32]),
            ed25519: PublicKey::from_bytes([tag + 1; 32]),
            bls: jam_types::BlsKey::zero(),
            metadata: jam_types::Metadata::zero(),
        }
    }

    fn state() -> ChainState {
        ChainState::genesis(vec![validator(1), validator(10), validator(20)], 12, 11, 3)
    }

    #[test]
    fn root_is_deterministic() {
        // two nodes applying the same state compute the same root
        assert_eq!(state_root(&state()), state_root(&state()));
    }

    #[test]
    fn root_changes_with_tau() {
        let mut s = state();
        let before = state_root(&s);
        s.tau = 9;
        assert_ne!(state_root(&s), before);
    }

    #[test]
    fn root_changes_with_tickets() {
        let mut s = state();
        let before = state_root(&s);
        s.gamma_a.push(Ticket {
            attempt: 0,
            randomness: Hash::from_bytes([3; 32]),
            proof: HexBytes::default(),
        });
        assert_ne!(state_root(&s), before);
    }

    #[test]
    fn root_changes_with_accounts() {
        let mut s = state();
        let before = state_root(&s);
        let mut account = ServiceAccount::default();
        account.lookup_meta.push(LookupEntry {
            key: LookupKey { hash: Hash::from_bytes([4; 32]), length: 10 },
            value: vec![],
        });
        s.accounts.insert(42, account);
        assert_ne!(state_root(&s), before);
    }

    #[test]
    fn every_chapter_has_an_entry() {
        let entries = state_entries(&state());
        // 18 chapters; no accounts in the genesis fixture
        assert_eq!(entries.len(), 18);
    }

    #[test]
    fn pending_and_queue_feed_the_root() {
        use jam_types::report::QueueStatus;

        let mut s = state();
        let report = jam_types::report::WorkReport {
            package_spec: jam_types::report::PackageSpec {
                hash: Hash::from_bytes([5; 32]),
                length: 1,
                erasure_root: Hash::zero(),
                exports_root: Hash::zero(),
                exports_count: 0,
            },
            context: jam_types::report::RefinementContext {
                anchor: Hash::zero(),
                anchor_slot: 0,
                lookup_anchor: Hash::zero(),
                lookup_anchor_slot: 0,
                prerequisites: vec![],
                current_guarantors: vec![],
                previous_guarantors: vec![],
                current_epoch: 0,
            },
            core_index: 0,
            authorizer_hash: Hash::zero(),
            results: vec![],
            segment_root_lookup: vec![],
            guarantor_public_key: PublicKey::from_bytes([6; 32]),
            guarantor_signature: jam_types::Signature::zero(),
            slot: 0,
        };

        let base = state_root(&s);
        s.rho.insert(
            report.digest(),
            PendingReport {
                report: report.clone(),
                received_signatures: Default::default(),
                submission_slot: 0,
            },
        );
        let with_rho = state_root(&s);
        assert_ne!(with_rho, base);

        s.rho.clear();
        s.omega.insert(
            report.digest(),
            jam_types::report::QueueEntry { report: report.clone(), status: QueueStatus::Ready },
        );
        assert_ne!(state_root(&s), with_rho);

        s.omega.clear();
        s.avail_assignments = vec![Some(AvailAssignment { report, timeout: 100 })];
        assert_ne!(state_root(&s), base);
    }
}
