//! Safrole block producer.
//!
//! When this validator is the scheduled leader for the target slot, assemble
//! a block over the collected extrinsic: bind the current state root and the
//! extrinsics root into the header, announce the VRF entropy, then seal with
//! the Bandersnatch prover.

use jam_crypto::vrf::ENTROPY_CONTEXT;
use jam_crypto::{SealProver, VrfError};
use jam_types::{Block, ChainState, Extrinsic, Header, PublicKey, TimeSlot, ValidatorIndex};

#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("not the leader for slot {0}")]
    NotLeader(TimeSlot),

    #[error("validator index {0} outside the active set")]
    UnknownValidator(ValidatorIndex),

    #[error("vrf service failed: {0}")]
    Vrf(#[from] VrfError),
}

/// Block production outcome: the sealed block and its hash.
#[derive(Clone, Debug)]
pub struct ProducedBlock {
    pub block: Block,
    pub block_hash: jam_types::Hash,
}

/// Structural defects of an incoming candidate block.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BlockValidationError {
    #[error("bad_extrinsics_root")]
    BadExtrinsicsRoot,

    #[error("bad_slot")]
    StaleSlot,

    #[error("missing_seal")]
    MissingSeal,

    #[error("bad_parent")]
    BadParent,
}

/// Structural checks before a candidate block reaches the STF pipeline:
/// the body must hash to the header's extrinsics root, the slot must
/// advance, the seal must be present, and the parent must match the head of
/// recent history (when there is one).
pub fn validate_block(block: &Block, state: &ChainState) -> Result<(), BlockValidationError> {
    if block.extrinsic.root() != block.header.extrinsics_root {
        return Err(BlockValidationError::BadExtrinsicsRoot);
    }
    if block.header.slot <= state.tau {
        return Err(BlockValidationError::StaleSlot);
    }
    if block.header.seal_signature.is_empty() {
        return Err(BlockValidationError::MissingSeal);
    }
    if let Some(head) = state.beta.last() {
        if block.header.parent_hash != head.header_hash {
            return Err(BlockValidationError::BadParent);
        }
    }
    Ok(())
}

/// The slot leader under the simplified round-robin selector.
///
/// The ticketed selector reads `gamma_s[slot_phase]`; the hand-off between
/// the two lives with the seal-key consumers.
pub fn leader_for_slot(slot: TimeSlot, validator_count: usize) -> ValidatorIndex {
    (slot as usize % validator_count) as ValidatorIndex
}

/// Check whether `validator_index` should author the block at `slot`.
pub fn is_leader(slot: TimeSlot, validator_count: usize, validator_index: ValidatorIndex) -> bool {
    validator_count > 0 && leader_for_slot(slot, validator_count) == validator_index
}

/// Assemble and seal a block for `slot` on top of `state`.
pub async fn produce_block<S: SealProver>(
    state: &ChainState,
    slot: TimeSlot,
    validator_index: ValidatorIndex,
    extrinsic: Extrinsic,
    parent_hash: jam_types::Hash,
    prover: &S,
) -> Result<ProducedBlock, ProducerError> {
    if !is_leader(slot, state.kappa.len(), validator_index) {
        return Err(ProducerError::NotLeader(slot));
    }
    let author = state
        .kappa
        .get(validator_index as usize)
        .ok_or(ProducerError::UnknownValidator(validator_index))?;

    let ring: Vec<PublicKey> = state.kappa.iter().map(|v| v.bandersnatch).collect();

    // Entropy announcement: VRF output over the entropy context, the slot
    // and the deep entropy accumulator.
    let mut entropy_input = Vec::with_capacity(ENTROPY_CONTEXT.len() + 4 + 32);
    entropy_input.extend_from_slice(ENTROPY_CONTEXT);
    entropy_input.extend_from_slice(&slot.to_le_bytes());
    entropy_input.extend_from_slice(state.eta[3].as_bytes());
    let entropy = prover.vrf_entropy(&ring, validator_index as u32, &entropy_input).await?;

    let state_root = jam_merkle::state_root(state);
    let extrinsics_root = extrinsic.root();

    let mut header = Header {
        slot,
        parent_hash,
        state_root,
        extrinsics_root,
        entropy,
        author_index: validator_index,
        author_key: author.bandersnatch,
        timestamp: chrono::Utc::now().timestamp_millis() as u64,
        epoch_mark: None,
        tickets_mark: None,
        offenders_mark: vec![],
        seal_signature: Default::default(),
        vrf_output: Default::default(),
    };

    // Seal: HS over the unsealed header, HV under the entropy context.
    let (seal_signature, vrf_output) =
        prover.seal(&ring, validator_index as u32, &header.unsealed_bytes()).await?;
    header.seal_signature = seal_signature;
    header.vrf_output = vrf_output;

    let block = Block { header, extrinsic };
    let block_hash = block.hash();

    tracing::info!(slot, %block_hash, author = validator_index, "block produced");

    Ok(ProducedBlock { block, block_hash })
}
