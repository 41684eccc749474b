//! Shared fixtures for the STF test modules.

use ed25519_dalek::SigningKey;

use jam_crypto::ed25519;
use jam_types::report::{PackageSpec, RefinementContext, WorkExecResult, WorkReport, WorkResult};
use jam_types::{
    BlsKey, ChainState, CoreIndex, Hash, HexBytes, Metadata, PublicKey, Signature,
    ValidatorRecord,
};

/// A validator set with its signing keys and a genesis state over it.
pub struct TestChain {
    pub keys: Vec<SigningKey>,
    pub state: ChainState,
}

/// Deterministic-enough validator set of size `n` (keys are random per run,
/// the state layout is not).
pub fn chain(n: usize) -> TestChain {
    let keys: Vec<SigningKey> =
        (0..n).map(|_| SigningKey::generate(&mut rand::thread_rng())).collect();
    let validators: Vec<ValidatorRecord> = keys
        .iter()
        .enumerate()
        .map(|(i, k)| ValidatorRecord {
            bandersnatch: PublicKey::from_bytes([i as u8 + 1; 32]),
            ed25519: ed25519::verifying_key_bytes(k),
            bls: BlsKey::zero(),
            metadata: Metadata::zero(),
        })
        .collect();
    TestChain { keys, state: ChainState::genesis(validators, 12, 11, 3) }
}

/// Minimal work-report on `core` distinguished by `tag`, unsigned.
pub fn report(core: CoreIndex, tag: u8) -> WorkReport {
    WorkReport {
        package_spec: PackageSpec {
            hash: Hash::from_bytes([tag; 32]),
            length: 64,
            erasure_root: Hash::zero(),
            exports_root: Hash::from_bytes([tag ^ 0xff; 32]),
            exports_count: 0,
        },
        context: RefinementContext {
            anchor: Hash::from_bytes([2; 32]),
            anchor_slot: 0,
            lookup_anchor: Hash::zero(),
            lookup_anchor_slot: 0,
            prerequisites: vec![],
            current_guarantors: vec![],
            previous_guarantors: vec![],
            current_epoch: 0,
        },
        core_index: core,
        authorizer_hash: Hash::zero(),
        results: vec![WorkResult {
            service_id: 0,
            code_hash: Hash::zero(),
            payload_hash: Hash::from_bytes([tag.wrapping_add(1); 32]),
            accumulate_gas: 100,
            result: WorkExecResult::Ok(HexBytes::new(vec![1, 2, 3])),
        }],
        segment_root_lookup: vec![],
        guarantor_public_key: PublicKey::from_bytes([9; 32]),
        guarantor_signature: Signature::zero(),
        slot: 0,
    }
}

/// Sign `report` with `key`, filling in the guarantor fields.
pub fn sign_report(report: &mut WorkReport, key: &SigningKey) {
    report.guarantor_public_key = ed25519::verifying_key_bytes(key);
    report.guarantor_signature = ed25519::sign(key, &report.signable_bytes());
}
