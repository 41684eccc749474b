//! Accumulation-queue processing.
//!
//! Runs after guarantee admission in the same block: orders the queue
//! topologically (dependencies in recent history or earlier in the queue),
//! invokes the PVM oracle for each ready entry, and moves successes into
//! recent history. Cycles are unresolved for this block and skipped.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use jam_types::report::QueueStatus;
use jam_types::{ChainState, Hash, HexBytes, ServiceId, TimeSlot};

/// One work item handed to the PVM for accumulation.
#[derive(Clone, Debug, serde::Serialize)]
pub struct AccumulateItem {
    pub payload_hash: Hash,
    pub result_ok: bool,
    pub work_output: Option<HexBytes>,
    pub package_hash: Hash,
    pub exports_root: Hash,
    pub authorizer_hash: Hash,
}

/// PVM invocation failure.
#[derive(Debug, thiserror::Error)]
pub enum PvmError {
    #[error("pvm rejected accumulation: {0}")]
    Rejected(String),

    #[error("pvm unreachable: {0}")]
    Unreachable(String),
}

/// Service-execution oracle invoked once per `(report, service)` pair.
///
/// The node wires this to the loopback PVM endpoint; in its absence
/// [`NoopPvm`] reduces accumulation to the local state transition.
#[allow(async_fn_in_trait)]
pub trait PvmOracle {
    async fn accumulate(
        &self,
        slot: TimeSlot,
        service_id: ServiceId,
        items: &[AccumulateItem],
    ) -> Result<(), PvmError>;
}

/// Oracle used when no PVM endpoint is configured: every accumulation
/// succeeds without service execution.
pub struct NoopPvm;

impl PvmOracle for NoopPvm {
    async fn accumulate(
        &self,
        _slot: TimeSlot,
        _service_id: ServiceId,
        _items: &[AccumulateItem],
    ) -> Result<(), PvmError> {
        Ok(())
    }
}

/// What accumulation did this block.
#[derive(Clone, Debug, Default)]
pub struct AccumulateOutput {
    /// Digests accumulated into recent history, in execution order.
    pub accumulated: Vec<Hash>,
    /// Digests evicted after a failed accumulation.
    pub failed: Vec<Hash>,
    /// Digests left queued because their dependencies did not resolve.
    pub deferred: Vec<Hash>,
}

/// Kahn's algorithm over the queue, restricted to entries whose dependencies
/// are satisfied by recent history or by earlier queue entries. Ties break by
/// ascending digest; members of dependency cycles are reported as deferred.
fn resolution_order(state: &ChainState) -> (Vec<Hash>, Vec<Hash>) {
    let queued: BTreeSet<Hash> = state.omega.keys().copied().collect();

    let mut in_degree: BTreeMap<Hash, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<Hash, Vec<Hash>> = BTreeMap::new();
    let mut unresolved: Vec<Hash> = Vec::new();

    'entries: for (digest, entry) in &state.omega {
        let mut degree = 0;
        for dep in entry.report.dependencies() {
            if state.xi.contains(dep) {
                continue;
            }
            if queued.contains(dep) {
                dependents.entry(*dep).or_default().push(*digest);
                degree += 1;
                continue;
            }
            // Dependency neither finalized nor queued: cannot run this block.
            unresolved.push(*digest);
            continue 'entries;
        }
        in_degree.insert(*digest, degree);
    }

    // BTreeMap iteration keeps the zero-degree frontier digest-ordered.
    let mut frontier: VecDeque<Hash> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(digest, _)| *digest)
        .collect();

    let mut order = Vec::with_capacity(in_degree.len());
    while let Some(digest) = frontier.pop_front() {
        order.push(digest);
        for dependent in dependents.get(&digest).cloned().unwrap_or_default() {
            if let Some(degree) = in_degree.get_mut(&dependent) {
                *degree -= 1;
                if *degree == 0 {
                    frontier.push_back(dependent);
                }
            }
        }
    }

    // Whatever never reached degree zero is part of a cycle.
    for (digest, _) in in_degree.iter().filter(|(_, d)| **d > 0) {
        if !order.contains(digest) {
            unresolved.push(*digest);
        }
    }

    (order, unresolved)
}

fn items_for_service(
    report: &jam_types::report::WorkReport,
    service_id: ServiceId,
) -> Vec<AccumulateItem> {
    report
        .results
        .iter()
        .filter(|r| r.service_id == service_id)
        .map(|r| AccumulateItem {
            payload_hash: r.payload_hash,
            result_ok: r.result.is_ok(),
            work_output: match &r.result {
                jam_types::report::WorkExecResult::Ok(out) => Some(out.clone()),
                jam_types::report::WorkExecResult::Err(_) => None,
            },
            package_hash: report.package_spec.hash,
            exports_root: report.package_spec.exports_root,
            authorizer_hash: report.authorizer_hash,
        })
        .collect()
}

/// Drain the ready entries of the accumulation queue.
pub async fn apply<P: PvmOracle>(
    pre: &ChainState,
    current_slot: TimeSlot,
    pvm: &P,
) -> (ChainState, AccumulateOutput) {
    let mut post = pre.clone();
    let mut output = AccumulateOutput::default();

    let (order, unresolved) = resolution_order(&post);
    output.deferred = unresolved;

    for digest in order {
        let Some(entry) = post.omega.get_mut(&digest) else { continue };
        if entry.status != QueueStatus::Ready {
            continue;
        }
        entry.status = QueueStatus::Processing;
        let report = entry.report.clone();

        let services: BTreeSet<ServiceId> =
            report.results.iter().map(|r| r.service_id).collect();

        let mut failure: Option<PvmError> = None;
        for service_id in services {
            let items = items_for_service(&report, service_id);
            if let Err(err) = pvm.accumulate(current_slot, service_id, &items).await {
                failure = Some(err);
                break;
            }
        }

        match failure {
            None => {
                post.omega.remove(&digest);
                post.xi.insert(digest);
                output.accumulated.push(digest);
                tracing::info!(%digest, "report accumulated");
            }
            Some(err) => {
                tracing::warn!(%digest, %err, "accumulation failed");
                post.omega.remove(&digest);
                post.psi.record_bad(
                    digest,
                    format!("accumulation_failed: {err}"),
                    report.guarantor_public_key,
                );
                post.psi.bump_offender(report.guarantor_public_key, current_slot);
                output.failed.push(digest);
            }
        }
    }

    (post, output)
}
