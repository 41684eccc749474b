//! Canonical on-chain types for the jamline node.
//!
//! Everything that lives in the canonical state document or on the block wire
//! is defined here: fixed-size byte primitives with hex/JSON round-tripping,
//! validator records, tickets, work-reports, block headers and extrinsics,
//! and the `ChainState` that every state-transition function reads and
//! produces.
//!
//! State maps are `BTreeMap`/`BTreeSet` throughout so that serialization,
//! iteration and state-root construction are deterministic.

pub mod block;
pub mod codec;
pub mod primitives;
pub mod report;
pub mod state;
pub mod validator;

pub use block::{
    Assurance, Block, Culprit, Disputes, EpochMark, Extrinsic, Fault, Header, Judgement, Preimage,
    TicketEnvelope, TicketId, Verdict,
};
pub use primitives::{BlsKey, Hash, HexBytes, Metadata, PublicKey, Signature};
pub use report::{
    AvailAssignment, PackageSpec, PendingReport, QueueEntry, QueueStatus, RefinementContext,
    ReportedPackage, SegmentRootLookup, WorkExecResult, WorkReport, WorkResult,
};
pub use state::{
    BetaBlock, ChainState, DisputeLedger, InvariantViolation, LookupEntry, LookupKey, MmrPeaks,
    SealKeys, ServiceAccount, ServiceStats, Statistics, Ticket, ValidatorStats,
};
pub use validator::{ValidatorRecord, PADDING_VALIDATOR};

/// Slot number (monotonic protocol time unit).
pub type TimeSlot = u32;

/// Epoch index (`slot / epoch_length`).
pub type EpochIndex = u32;

/// Validator index within a validator set.
pub type ValidatorIndex = u16;

/// Core index.
pub type CoreIndex = u16;

/// Service identifier.
pub type ServiceId = u32;

/// Gas units.
pub type Gas = u64;

/// Split a timeslot into `(epoch, slot phase)`.
pub fn epoch_and_phase(slot: TimeSlot, epoch_length: u32) -> (EpochIndex, u32) {
    (slot / epoch_length, slot % epoch_length)
}

/// Byzantine super-majority threshold: `2n/3 + 1` out of `n` participants.
pub fn super_majority(n: usize) -> usize {
    n * 2 / 3 + 1
}

/// Guarantor promotion threshold: `ceil(2n/3)` of the assigned guarantors.
pub fn guarantor_threshold(n: usize) -> usize {
    (n * 2).div_ceil(3)
}
