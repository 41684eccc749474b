//! Block header, extrinsic and dispute wire types.

use serde::{Deserialize, Serialize};

use crate::codec::{blake2b_256, Encoder};
use crate::primitives::{Hash, HexBytes, PublicKey, Signature};
use crate::{EpochIndex, ServiceId, TimeSlot, ValidatorIndex};

/// Winning-ticket identity published in header marks and seal-key sequences.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketId {
    pub id: Hash,
    pub attempt: u8,
}

/// Epoch-change announcement embedded in the first header of an epoch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochMark {
    pub entropy: Hash,
    pub tickets_entropy: Hash,
    pub validators: Vec<EpochMarkValidator>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochMarkValidator {
    pub bandersnatch: PublicKey,
    pub ed25519: PublicKey,
}

/// Block header.
///
/// `seal_signature` and `vrf_output` are excluded from the signable form:
/// the seal is generated over [`Header::unsealed_bytes`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub slot: TimeSlot,
    pub parent_hash: Hash,
    pub state_root: Hash,
    pub extrinsics_root: Hash,
    /// VRF entropy contribution `Y(HV)` announced by the author.
    pub entropy: Hash,
    pub author_index: ValidatorIndex,
    pub author_key: PublicKey,
    pub timestamp: u64,
    #[serde(default)]
    pub epoch_mark: Option<EpochMark>,
    #[serde(default)]
    pub tickets_mark: Option<Vec<TicketId>>,
    #[serde(default)]
    pub offenders_mark: Vec<PublicKey>,
    /// Bandersnatch seal `HS` (opaque IETF VRF signature).
    #[serde(default)]
    pub seal_signature: HexBytes,
    /// Seal VRF output `HV`.
    #[serde(default)]
    pub vrf_output: Hash,
}

impl Header {
    /// Canonical bytes of the header without its seal fields.
    pub fn unsealed_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::with_capacity(192);
        enc.u32(self.slot)
            .fixed(self.parent_hash)
            .fixed(self.state_root)
            .fixed(self.extrinsics_root)
            .fixed(self.entropy)
            .u16(self.author_index)
            .fixed(self.author_key)
            .u64(self.timestamp);
        match &self.epoch_mark {
            Some(mark) => {
                enc.u8(1).fixed(mark.entropy).fixed(mark.tickets_entropy).seq(
                    &mark.validators,
                    |e, v| {
                        e.fixed(v.bandersnatch).fixed(v.ed25519);
                    },
                );
            }
            None => {
                enc.u8(0);
            }
        }
        match &self.tickets_mark {
            Some(tickets) => {
                enc.u8(1).seq(tickets, |e, t| {
                    e.fixed(t.id).u8(t.attempt);
                });
            }
            None => {
                enc.u8(0);
            }
        }
        enc.seq(&self.offenders_mark, |e, k| {
            e.fixed(k);
        });
        enc.finish()
    }

    /// Header hash: blake2b over the unsealed form plus the seal fields.
    pub fn hash(&self) -> Hash {
        let mut enc = Encoder::new();
        enc.bytes(self.unsealed_bytes()).bytes(&self.seal_signature).fixed(self.vrf_output);
        blake2b_256(enc.finish())
    }
}

/// Ring-VRF ticket submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketEnvelope {
    pub attempt: u8,
    /// Ring-VRF proof, verified against `gamma_z` by the prover service.
    pub signature: HexBytes,
}

/// Availability attestation by one validator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assurance {
    pub validator_index: ValidatorIndex,
    /// One bit per core, little-endian within each byte.
    pub bitfield: HexBytes,
    pub signature: Signature,
    #[serde(default)]
    pub anchor: Option<Hash>,
}

impl Assurance {
    /// Canonical payload covered by the assurance signature.
    pub fn signable_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.opt_fixed(self.anchor.as_ref()).bytes(&self.bitfield);
        enc.finish()
    }

    /// Core indices with a set bit.
    pub fn cores(&self) -> Vec<crate::CoreIndex> {
        let mut cores = Vec::new();
        for (byte_idx, byte) in self.bitfield.as_slice().iter().enumerate() {
            for bit in 0..8 {
                if byte & (1 << bit) != 0 {
                    cores.push((byte_idx * 8 + bit) as crate::CoreIndex);
                }
            }
        }
        cores
    }
}

/// Solicited preimage provision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preimage {
    pub requester: ServiceId,
    pub blob: HexBytes,
}

/// One validator's judgement inside a verdict.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Judgement {
    pub vote: bool,
    pub index: ValidatorIndex,
    pub signature: Signature,
}

impl Judgement {
    /// Signed payload: a validity prefix and the verdict target.
    pub fn signable_bytes(vote: bool, target: &Hash) -> Vec<u8> {
        let prefix: &[u8] = if vote { b"jam_valid" } else { b"jam_invalid" };
        let mut enc = Encoder::new();
        enc.fixed(prefix).fixed(target);
        enc.finish()
    }
}

/// Judgement set over one report digest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub target: Hash,
    /// Epoch the judging validator set belongs to (current or previous).
    pub age: EpochIndex,
    pub votes: Vec<Judgement>,
}

/// A guarantor of a report judged bad.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Culprit {
    pub target: Hash,
    pub key: PublicKey,
    pub signature: Signature,
}

impl Culprit {
    /// Signed payload: the guarantee context and the bad report's digest.
    pub fn signable_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.fixed(b"jam_guarantee").fixed(self.target);
        enc.finish()
    }
}

/// A judge whose vote contradicted the verdict outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub target: Hash,
    pub vote: bool,
    pub key: PublicKey,
    pub signature: Signature,
}

impl Fault {
    /// Signed payload: same form as the judgement the fault contradicts.
    pub fn signable_bytes(&self) -> Vec<u8> {
        Judgement::signable_bytes(self.vote, &self.target)
    }
}

/// Dispute extrinsic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disputes {
    #[serde(default)]
    pub verdicts: Vec<Verdict>,
    #[serde(default)]
    pub culprits: Vec<Culprit>,
    #[serde(default)]
    pub faults: Vec<Fault>,
}

impl Disputes {
    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty() && self.culprits.is_empty() && self.faults.is_empty()
    }
}

/// Block body.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extrinsic {
    #[serde(default)]
    pub tickets: Vec<TicketEnvelope>,
    #[serde(default)]
    pub guarantees: Vec<crate::report::WorkReport>,
    #[serde(default)]
    pub assurances: Vec<Assurance>,
    #[serde(default)]
    pub preimages: Vec<Preimage>,
    #[serde(default)]
    pub disputes: Disputes,
}

impl Extrinsic {
    /// Canonical bytes of the whole body, hashed into `extrinsics_root`.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::with_capacity(256);
        enc.seq(&self.tickets, |e, t| {
            e.u8(t.attempt).bytes(&t.signature);
        });
        enc.seq(&self.guarantees, |e, g| {
            e.bytes(g.signable_bytes()).fixed(g.guarantor_signature);
        });
        enc.seq(&self.assurances, |e, a| {
            e.u16(a.validator_index).bytes(a.signable_bytes()).fixed(a.signature);
        });
        enc.seq(&self.preimages, |e, p| {
            e.u32(p.requester).bytes(&p.blob);
        });
        enc.seq(&self.disputes.verdicts, |e, v| {
            e.fixed(v.target).u32(v.age).seq(&v.votes, |e, j| {
                e.bool(j.vote).u16(j.index).fixed(j.signature);
            });
        });
        enc.seq(&self.disputes.culprits, |e, c| {
            e.fixed(c.target).fixed(c.key).fixed(c.signature);
        });
        enc.seq(&self.disputes.faults, |e, f| {
            e.fixed(f.target).bool(f.vote).fixed(f.key).fixed(f.signature);
        });
        enc.finish()
    }

    pub fn root(&self) -> Hash {
        blake2b_256(self.canonical_bytes())
    }
}

/// A complete block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub extrinsic: Extrinsic,
}

impl Block {
    pub fn hash(&self) -> Hash {
        let mut enc = Encoder::new();
        enc.fixed(self.header.hash()).bytes(self.extrinsic.canonical_bytes());
        blake2b_256(enc.finish())
    }
}
