//! The GRANDPA round driver.
//!
//! One round per finalization attempt, two phases. The engine signs and
//! broadcasts its own vote, waits out the stage window, then tallies what
//! arrived, persisting every vote before it is counted. Finalization
//! requires a non-nil super-majority precommit on a candidate that is still
//! audited and equivocation-free; anything else is "no finalization this
//! round" and the caller retries next round.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ed25519_dalek::SigningKey;

use jam_crypto::ed25519;
use jam_types::{super_majority, Hash, PublicKey};

use super::gossip::VoteTransport;
use super::messages::{
    vote_canonical, Justification, JustificationSignature, PeerMessage, Stage, VoteMsg,
};
use super::store::{VoteStore, VoteStoreError};
use super::tree::BlockTree;

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct GrandpaConfig {
    /// Our validator id.
    pub node_id: u32,
    /// Vote-verification keys by validator id.
    pub validators: BTreeMap<u32, PublicKey>,
    /// Prevote collection window; zero gives deterministic test rounds.
    pub prevote_timeout: Duration,
    /// Precommit collection window.
    pub precommit_timeout: Duration,
}

/// Where the round driver currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundStage {
    Idle,
    Prevote,
    Precommit,
    Finalized,
    Failed,
}

/// What one round produced.
#[derive(Clone, Debug)]
pub struct RoundOutcome {
    pub round: u64,
    pub finalized: Option<Hash>,
    pub justification: Option<Justification>,
}

#[derive(Debug, thiserror::Error)]
pub enum GrandpaError {
    #[error(transparent)]
    Store(#[from] VoteStoreError),
}

/// The finality engine. One round runs at a time.
pub struct GrandpaEngine<T: VoteTransport> {
    config: GrandpaConfig,
    signing_key: SigningKey,
    transport: T,
    store: VoteStore,
    tree: Arc<Mutex<BlockTree>>,
    round: u64,
    stage: RoundStage,
    finalized: Option<Hash>,
}

impl<T: VoteTransport> GrandpaEngine<T> {
    /// Build the engine, recovering the finalized pointer from the store.
    pub fn new(
        config: GrandpaConfig,
        signing_key: SigningKey,
        transport: T,
        store: VoteStore,
        tree: Arc<Mutex<BlockTree>>,
    ) -> Result<Self, GrandpaError> {
        let finalized = store.load_finalized()?;
        if let Some(hash) = &finalized {
            tracing::info!(%hash, "recovered finalized pointer");
        }
        Ok(Self {
            config,
            signing_key,
            transport,
            store,
            tree,
            round: 0,
            stage: RoundStage::Idle,
            finalized,
        })
    }

    pub fn stage(&self) -> RoundStage {
        self.stage
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn finalized(&self) -> Option<Hash> {
        self.finalized
    }

    pub fn tree(&self) -> Arc<Mutex<BlockTree>> {
        Arc::clone(&self.tree)
    }

    fn threshold(&self) -> usize {
        super_majority(self.config.validators.len())
    }

    /// Resume after a crash: jump to the highest persisted round and feed
    /// that round's votes back into the stage buffers so the next
    /// `run_round` counts them.
    pub fn replay_persisted_votes(&mut self) -> Result<usize, GrandpaError> {
        let votes = self.store.load_votes()?;
        let Some(max_round) = votes.iter().map(|v| v.round).max() else {
            return Ok(0);
        };
        self.round = max_round;

        let mut replayed = 0;
        for vote in votes.into_iter().filter(|v| v.round == max_round) {
            self.transport.enqueue_vote(vote);
            replayed += 1;
        }
        tracing::info!(round = max_round, replayed, "replayed persisted votes");
        Ok(replayed)
    }

    fn sign_vote(
        &self,
        stage: Stage,
        block_hash: Option<Hash>,
        block_height: Option<u64>,
        state_root: Option<Hash>,
    ) -> VoteMsg {
        let canonical = vote_canonical(
            self.round,
            stage,
            block_hash.as_ref(),
            block_height,
            state_root.as_ref(),
        );
        VoteMsg {
            round: self.round,
            stage,
            block_hash,
            block_height,
            state_root,
            validator: self.config.node_id,
            signature: ed25519::sign(&self.signing_key, canonical.as_bytes()),
        }
    }

    /// Persist, verify and deduplicate a stage's votes. Every vote is
    /// persisted before it is considered; verification failures and
    /// duplicate validators only reduce the set.
    fn persist_and_filter(&self, votes: Vec<VoteMsg>) -> Result<Vec<VoteMsg>, GrandpaError> {
        let mut valid = Vec::with_capacity(votes.len());
        let mut seen: BTreeSet<u32> = BTreeSet::new();

        for vote in votes {
            self.store.persist_vote(&vote)?;

            let Some(public_key) = self.config.validators.get(&vote.validator) else {
                tracing::debug!(validator = vote.validator, "vote from unknown validator");
                continue;
            };
            if !vote.verify(public_key) {
                tracing::warn!(validator = vote.validator, "vote signature invalid");
                continue;
            }
            if !seen.insert(vote.validator) {
                continue;
            }
            valid.push(vote);
        }

        Ok(valid)
    }

    /// Tally non-nil hashes over a verified vote set.
    fn tally(votes: &[VoteMsg]) -> BTreeMap<Hash, usize> {
        let mut counts: BTreeMap<Hash, usize> = BTreeMap::new();
        for vote in votes {
            if let Some(hash) = vote.block_hash {
                *counts.entry(hash).or_default() += 1;
            }
        }
        counts
    }

    fn super_majority_candidate(&self, counts: &BTreeMap<Hash, usize>) -> Option<Hash> {
        counts
            .iter()
            .filter(|(_, count)| **count >= self.threshold())
            .max_by_key(|(hash, count)| (**count, **hash))
            .map(|(hash, _)| *hash)
    }

    /// Import a block into the tree and announce it to peers.
    pub async fn announce_block(&self, record: super::tree::BlockRecord) {
        self.tree.lock().expect("block tree lock").add_block(record.clone());
        self.transport.broadcast(&PeerMessage::Block(record)).await;
    }

    /// Drive one full round.
    pub async fn run_round(&mut self) -> Result<RoundOutcome, GrandpaError> {
        let round = self.round;
        tracing::info!(round, node = self.config.node_id, "starting finality round");

        // PREVOTE: vote for the best audited head, nil if none qualifies.
        self.stage = RoundStage::Prevote;
        let head = {
            let tree = self.tree.lock().expect("block tree lock");
            tree.best_chain_head(self.finalized.as_ref())
                .map(|record| (record.hash, record.height, record.state_root))
        };
        let (head_hash, head_height, head_root) = match head {
            Some((hash, height, root)) => (Some(hash), Some(height), Some(root)),
            None => (None, None, None),
        };

        let prevote = self.sign_vote(Stage::Prevote, head_hash, head_height, head_root);
        self.store.persist_vote(&prevote)?;
        self.transport.broadcast(&PeerMessage::Vote(prevote.clone())).await;
        self.transport.enqueue_vote(prevote);

        tokio::time::sleep(self.config.prevote_timeout).await;

        let prevotes = self.persist_and_filter(self.transport.collect(Stage::Prevote, round))?;
        let prevote_counts = Self::tally(&prevotes);
        let candidate = self.super_majority_candidate(&prevote_counts);

        tracing::debug!(
            round,
            candidate = candidate.map(|h| h.to_hex()).unwrap_or_else(|| "nil".into()),
            "prevote tally complete"
        );

        // PRECOMMIT: commit to the prevote candidate, nil otherwise.
        self.stage = RoundStage::Precommit;
        let (candidate_height, candidate_root) = match &candidate {
            Some(hash) => {
                let tree = self.tree.lock().expect("block tree lock");
                let record = tree.get(hash);
                (record.map(|r| r.height), record.map(|r| r.state_root))
            }
            None => (None, None),
        };

        let precommit = self.sign_vote(Stage::Precommit, candidate, candidate_height, candidate_root);
        self.store.persist_vote(&precommit)?;
        self.transport.broadcast(&PeerMessage::Vote(precommit.clone())).await;
        self.transport.enqueue_vote(precommit);

        tokio::time::sleep(self.config.precommit_timeout).await;

        let precommits =
            self.persist_and_filter(self.transport.collect(Stage::Precommit, round))?;
        let precommit_counts = Self::tally(&precommits);
        let finalize_target = self.super_majority_candidate(&precommit_counts);

        // FINALIZE: the candidate must still be audited and free of
        // equivocation down to the finalized ancestor.
        let mut outcome = RoundOutcome { round, finalized: None, justification: None };
        if let Some(target) = finalize_target {
            let acceptable = {
                let tree = self.tree.lock().expect("block tree lock");
                let audited = tree.get(&target).map(|r| r.audited).unwrap_or(false);
                audited && !tree.has_equivocation(&target, self.finalized.as_ref())
            };

            if acceptable {
                self.finalized = Some(target);
                self.store.store_finalized(&target)?;

                let signatures: Vec<JustificationSignature> = precommits
                    .iter()
                    .filter(|v| v.block_hash == Some(target))
                    .map(|v| JustificationSignature {
                        validator: v.validator,
                        signature: v.signature,
                    })
                    .collect();

                tracing::info!(round, block = %target, votes = signatures.len(), "block finalized");
                outcome.finalized = Some(target);
                outcome.justification =
                    Some(Justification { round, block_hash: target, signatures });
                self.stage = RoundStage::Finalized;
            } else {
                tracing::info!(round, block = %target, "candidate equivocated or unaudited; no finalization");
                self.stage = RoundStage::Failed;
            }
        } else {
            tracing::info!(round, "no super-majority precommit; no finalization");
            self.stage = RoundStage::Failed;
        }

        self.round += 1;
        Ok(outcome)
    }
}
