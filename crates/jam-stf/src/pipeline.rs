//! The per-block STF pipeline.
//!
//! Runs the transitions in the fixed order (safrole, disputes, statistics,
//! guarantees with accumulation, assurances, preimages, history) over an
//! immutable pre-state snapshot, then commits to the result with the state
//! trie. The first fatal error aborts the block; no partial post-state is
//! ever returned.

use jam_crypto::{blake2b_256, RingVerifier};
use jam_types::report::{ReportedPackage, WorkReport};
use jam_types::state::InvariantViolation;
use jam_types::{Block, ChainState, Hash, PublicKey};

use crate::accumulate::{self, PvmOracle};
use crate::assurances::{self, AssuranceError, AssurancesInput};
use crate::disputes::{self, DisputeError};
use crate::guarantees;
use crate::history::{self, HistoryInput};
use crate::preimages::{self, PreimageError};
use crate::safrole::{self, SafroleError, SafroleInput, SafroleOutput};
use crate::statistics;

/// Everything a successfully processed block yields.
#[derive(Clone, Debug)]
pub struct BlockOutcome {
    pub post_state: ChainState,
    /// Header marks from the slot/epoch transition.
    pub safrole: SafroleOutput,
    /// Keys newly convicted by this block's disputes.
    pub offenders_mark: Vec<PublicKey>,
    /// Reports whose availability reached super-majority.
    pub reported: Vec<WorkReport>,
    /// Digests accumulated into recent history.
    pub accumulated: Vec<Hash>,
    /// State-trie root of the post-state.
    pub state_root: Hash,
}

/// First fatal error of the pipeline; the block is rejected as a whole.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Safrole(#[from] SafroleError),

    #[error(transparent)]
    Disputes(#[from] DisputeError),

    #[error(transparent)]
    Assurances(#[from] AssuranceError),

    #[error(transparent)]
    Preimages(#[from] PreimageError),

    #[error("invariant violated after transition: {0}")]
    Invariant(#[from] InvariantViolation),
}

impl PipelineError {
    /// The wire-facing error string of the underlying failure.
    pub fn code(&self) -> String {
        match self {
            PipelineError::Safrole(e) => e.to_string(),
            PipelineError::Disputes(e) => e.to_string(),
            PipelineError::Assurances(e) => e.to_string(),
            PipelineError::Preimages(e) => e.to_string(),
            PipelineError::Invariant(e) => e.to_string(),
        }
    }
}

/// Root over the digests accumulated this block; zero when none were.
fn accumulate_root(accumulated: &[Hash]) -> Hash {
    if accumulated.is_empty() {
        return Hash::zero();
    }
    let mut bytes = Vec::with_capacity(accumulated.len() * 32);
    for digest in accumulated {
        bytes.extend_from_slice(digest.as_bytes());
    }
    blake2b_256(bytes)
}

/// Process one candidate block against the canonical pre-state.
pub async fn process_block<V: RingVerifier, P: PvmOracle>(
    pre: &ChainState,
    block: &Block,
    ring_verifier: &V,
    pvm: &P,
) -> Result<BlockOutcome, PipelineError> {
    let header = &block.header;
    let extrinsic = &block.extrinsic;
    let slot = header.slot;

    tracing::info!(slot, parent = %header.parent_hash, "processing block");

    // 1. Safrole: slot/epoch transition and ticket admission.
    let safrole_input = SafroleInput {
        slot,
        entropy: header.entropy,
        tickets: extrinsic.tickets.clone(),
    };
    let (state, safrole_out) = safrole::apply(pre, &safrole_input, ring_verifier).await?;

    // 2. Disputes: verdicts, culprits, faults.
    let (state, disputes_out) = disputes::apply(&state, &extrinsic.disputes, slot)?;

    // 3. Statistics: per-validator activity counters.
    let epoch_changed = safrole_out.epoch_mark.is_some();
    let state = statistics::apply(&state, header.author_index, epoch_changed, extrinsic);

    // 4. Guarantees: admission, promotion, timeout, then accumulation.
    let (state, _guarantees_out) = guarantees::apply(&state, &extrinsic.guarantees, slot);
    let (state, accumulate_out) = accumulate::apply(&state, slot, pvm).await;

    // 5. Assurances: availability attestations.
    let assurances_input = AssurancesInput {
        parent: Some(header.parent_hash),
        slot,
        assurances: extrinsic.assurances.clone(),
    };
    let (state, assurances_out) = assurances::apply(&state, &assurances_input)?;

    // 6. Preimages.
    let (state, _preimages_out) = preimages::apply(&state, &extrinsic.preimages, slot)?;

    // 7. History: append the beta entry for this block.
    let history_input = HistoryInput {
        header_hash: header.hash(),
        parent_state_root: header.state_root,
        accumulate_root: accumulate_root(&accumulate_out.accumulated),
        work_packages: extrinsic
            .guarantees
            .iter()
            .map(|g| ReportedPackage {
                hash: g.package_spec.hash,
                exports_root: g.package_spec.exports_root,
            })
            .collect(),
    };
    let state = history::apply(&state, &history_input);

    state.check_invariants()?;

    // 8. Commit: the state-trie root over the merged post-state.
    let state_root = jam_merkle::state_root(&state);

    tracing::info!(slot, %state_root, "block processed");

    Ok(BlockOutcome {
        post_state: state,
        safrole: safrole_out,
        offenders_mark: disputes_out.offenders_mark,
        reported: assurances_out.reported,
        accumulated: accumulate_out.accumulated,
        state_root,
    })
}
