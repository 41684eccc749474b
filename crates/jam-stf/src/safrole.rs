//! Safrole slot/epoch transition.
//!
//! Per block: rotate the entropy accumulators, admit ring-VRF tickets during
//! the submission phase, and on epoch change rotate the validator sets, the
//! ring commitment and the seal-key sequence.

use jam_crypto::{blake2b_256_concat, RingVerifier, VrfError};
use jam_types::block::{EpochMark, EpochMarkValidator, TicketEnvelope, TicketId};
use jam_types::state::{SealKeys, Ticket};
use jam_types::validator::replace_offenders_with_padding;
use jam_types::{epoch_and_phase, ChainState, Hash, PublicKey, TimeSlot, ValidatorRecord};

/// Safrole block input: the header slot, the author's VRF entropy
/// contribution, and the ticket extrinsic.
#[derive(Clone, Debug)]
pub struct SafroleInput {
    pub slot: TimeSlot,
    pub entropy: Hash,
    pub tickets: Vec<TicketEnvelope>,
}

/// Header marks produced by the transition.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SafroleOutput {
    pub epoch_mark: Option<EpochMark>,
    pub tickets_mark: Option<Vec<TicketId>>,
}

/// Fatal Safrole failures; names are the wire-facing error strings.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SafroleError {
    #[error("bad_slot")]
    BadSlot,

    #[error("unexpected_ticket")]
    UnexpectedTicket,

    #[error("bad_ticket_attempt")]
    BadTicketAttempt,

    #[error("bad_ticket_proof")]
    BadTicketProof,

    #[error("bad_ticket_order")]
    BadTicketOrder,

    #[error("duplicate_ticket")]
    DuplicateTicket,

    #[error("rust_server_batch_verify_failed")]
    BatchVerifyFailed,
}

impl From<VrfError> for SafroleError {
    fn from(err: VrfError) -> Self {
        tracing::error!(%err, "ring-vrf batch verification unavailable");
        SafroleError::BatchVerifyFailed
    }
}

/// Zig-zag interleave: alternately take from the head and the tail.
///
/// Orders a saturated ticket accumulator into the per-slot seal sequence.
pub fn zigzag<T: Clone>(sequence: &[T]) -> Vec<T> {
    let mut out = Vec::with_capacity(sequence.len());
    let (mut left, mut right) = (0usize, sequence.len());
    while left < right {
        out.push(sequence[left].clone());
        left += 1;
        if left < right {
            right -= 1;
            out.push(sequence[right].clone());
        }
    }
    out
}

/// Fallback seal-key selection: one bandersnatch key per slot of the epoch,
/// drawn from `kappa` by `blake2b(eta2 ‖ le32(i))`.
pub fn fallback_seal_keys(
    eta2: &Hash,
    kappa: &[ValidatorRecord],
    epoch_length: u32,
) -> Vec<PublicKey> {
    if kappa.is_empty() {
        return Vec::new();
    }
    (0..epoch_length)
        .map(|i| {
            let digest = blake2b_256_concat(eta2, i.to_le_bytes());
            let raw = u32::from_le_bytes(digest.as_bytes()[..4].try_into().expect("4-byte slice"));
            kappa[raw as usize % kappa.len()].bandersnatch
        })
        .collect()
}

fn tickets_mark_of(gamma_a: &[Ticket]) -> Vec<TicketId> {
    zigzag(gamma_a)
        .into_iter()
        .map(|t| TicketId { id: t.randomness, attempt: t.attempt })
        .collect()
}

/// Apply the Safrole transition.
pub async fn apply<V: RingVerifier>(
    pre: &ChainState,
    input: &SafroleInput,
    verifier: &V,
) -> Result<(ChainState, SafroleOutput), SafroleError> {
    if input.slot <= pre.tau {
        return Err(SafroleError::BadSlot);
    }

    let is_gap_block = input.slot > pre.tau + 1;
    if is_gap_block && !input.tickets.is_empty() {
        return Err(SafroleError::UnexpectedTicket);
    }

    let mut post = pre.clone();

    let (prev_epoch, prev_phase) = epoch_and_phase(pre.tau, pre.epoch_length);
    let (next_epoch, next_phase) = epoch_and_phase(input.slot, pre.epoch_length);
    let epoch_change = next_epoch > prev_epoch;

    // Entropy rotation. eta0 always folds in the new VRF output; on epoch
    // change the history accumulators shift down by one.
    let eta0_prime = blake2b_256_concat(pre.eta[0], input.entropy);
    post.eta = if epoch_change {
        [eta0_prime, pre.eta[0], pre.eta[1], pre.eta[2]]
    } else {
        [eta0_prime, pre.eta[1], pre.eta[2], pre.eta[3]]
    };

    // Ticket admission, inside the submission phase only.
    if next_phase < pre.ticket_cutoff && !input.tickets.is_empty() {
        for ticket in &input.tickets {
            if ticket.attempt >= pre.ticket_attempts {
                return Err(SafroleError::BadTicketAttempt);
            }
        }

        let ring: Vec<PublicKey> = pre.gamma_k.iter().map(|v| v.bandersnatch).collect();
        let results =
            verifier.verify_tickets(&pre.gamma_z, &ring, &post.eta[2], &input.tickets).await?;

        let mut randomness = Vec::with_capacity(results.len());
        for result in &results {
            match (result.ok, result.output_hash) {
                (true, Some(output)) => randomness.push((output, result.attempt)),
                _ => return Err(SafroleError::BadTicketProof),
            }
        }

        for pair in randomness.windows(2) {
            if pair[0].0 > pair[1].0 {
                return Err(SafroleError::BadTicketOrder);
            }
            if pair[0].0 == pair[1].0 {
                return Err(SafroleError::DuplicateTicket);
            }
        }

        let existing: std::collections::BTreeSet<Hash> =
            post.gamma_a.iter().map(|t| t.randomness).collect();
        let mut envelope_by_attempt: std::collections::BTreeMap<u8, &TicketEnvelope> =
            Default::default();
        for envelope in &input.tickets {
            envelope_by_attempt.insert(envelope.attempt, envelope);
        }

        for (output, attempt) in randomness {
            if existing.contains(&output) {
                return Err(SafroleError::DuplicateTicket);
            }
            let envelope =
                envelope_by_attempt.get(&attempt).ok_or(SafroleError::BadTicketProof)?;
            post.gamma_a.push(Ticket {
                attempt,
                randomness: output,
                proof: envelope.signature.clone(),
            });
        }

        post.gamma_a.sort_by(|a, b| a.randomness.cmp(&b.randomness));
        post.gamma_a.truncate(pre.epoch_length as usize);
    }

    let mut epoch_mark = None;
    if epoch_change {
        post.lambda = pre.kappa.clone();
        post.kappa = pre.gamma_k.clone();
        post.gamma_k = replace_offenders_with_padding(&pre.iota, &pre.post_offenders);

        let ring: Vec<PublicKey> = post.gamma_k.iter().map(|v| v.bandersnatch).collect();
        post.gamma_z = verifier.compose_commitment(&ring).await?;

        let saturated = pre.gamma_a.len() == pre.epoch_length as usize;
        let immediate = next_epoch == prev_epoch + 1;
        post.gamma_s = if immediate && prev_phase >= pre.ticket_cutoff && saturated {
            SealKeys::Tickets(tickets_mark_of(&pre.gamma_a))
        } else {
            SealKeys::Keys(fallback_seal_keys(&post.eta[2], &post.kappa, pre.epoch_length))
        };

        post.gamma_a.clear();

        epoch_mark = Some(EpochMark {
            entropy: pre.eta[0],
            tickets_entropy: pre.eta[1],
            validators: post
                .gamma_k
                .iter()
                .map(|v| EpochMarkValidator { bandersnatch: v.bandersnatch, ed25519: v.ed25519 })
                .collect(),
        });
    }

    // Tickets mark: emitted when this block crosses the submission cutoff
    // within the epoch and the accumulator is saturated.
    let crossed_cutoff = !epoch_change
        && prev_phase < pre.ticket_cutoff
        && next_phase >= pre.ticket_cutoff;
    let tickets_mark = (crossed_cutoff && post.gamma_a.len() == pre.epoch_length as usize)
        .then(|| tickets_mark_of(&post.gamma_a));

    post.tau = input.slot;

    tracing::debug!(
        slot = input.slot,
        epoch_change,
        tickets = input.tickets.len(),
        accumulator = post.gamma_a.len(),
        "safrole transition applied"
    );

    Ok((post, SafroleOutput { epoch_mark, tickets_mark }))
}

#[cfg(test)]
mod tests {
    use jam_crypto::{blake2b_256, vrf::TicketVerification};
    use jam_types::{BlsKey, HexBytes, Metadata};

    use super::*;

    /// Deterministic stand-in for the ring-VRF service: output hash is
    /// blake2b(eta2 ‖ attempt), commitment is blake2b over the ring keys.
    struct MockVerifier {
        fail_verification: bool,
        forced_outputs: Option<Vec<Hash>>,
    }

    impl MockVerifier {
        fn ok() -> Self {
            Self { fail_verification: false, forced_outputs: None }
        }

        fn with_outputs(outputs: Vec<Hash>) -> Self {
            Self { fail_verification: false, forced_outputs: Some(outputs) }
        }
    }

    impl RingVerifier for MockVerifier {
        async fn verify_tickets(
            &self,
            _gamma_z: &HexBytes,
            _ring: &[PublicKey],
            eta2: &Hash,
            tickets: &[TicketEnvelope],
        ) -> Result<Vec<TicketVerification>, VrfError> {
            if self.fail_verification {
                return Ok(tickets
                    .iter()
                    .map(|t| TicketVerification { ok: false, output_hash: None, attempt: t.attempt })
                    .collect());
            }
            Ok(tickets
                .iter()
                .enumerate()
                .map(|(i, t)| TicketVerification {
                    ok: true,
                    output_hash: Some(match &self.forced_outputs {
                        Some(outputs) => outputs[i],
                        None => blake2b_256_concat(eta2, [t.attempt]),
                    }),
                    attempt: t.attempt,
                })
                .collect())
        }

        async fn compose_commitment(&self, keys: &[PublicKey]) -> Result<HexBytes, VrfError> {
            let mut bytes = Vec::new();
            for key in keys {
                bytes.extend_from_slice(key.as_bytes());
            }
            Ok(HexBytes::new(blake2b_256(bytes).as_bytes().to_vec()))
        }
    }

    fn validator(tag: u8) -> ValidatorRecord {
        ValidatorRecord {
            bandersnatch: PublicKey::from_bytes([tag; 32]),
            ed25519: PublicKey::from_bytes([tag + 100; 32]),
            bls: BlsKey::zero(),
            metadata: Metadata::zero(),
        }
    }

    fn state() -> ChainState {
        let mut s = ChainState::genesis(vec![validator(1), validator(2), validator(3)], 12, 11, 3);
        s.eta = [
            Hash::from_bytes([10; 32]),
            Hash::from_bytes([11; 32]),
            Hash::from_bytes([12; 32]),
            Hash::from_bytes([13; 32]),
        ];
        s
    }

    fn input(slot: TimeSlot) -> SafroleInput {
        SafroleInput { slot, entropy: Hash::from_bytes([0xe0; 32]), tickets: vec![] }
    }

    fn ticket(attempt: u8) -> TicketEnvelope {
        TicketEnvelope { attempt, signature: HexBytes::new(vec![attempt; 4]) }
    }

    #[tokio::test]
    async fn rejects_stale_slot() {
        let mut s = state();
        s.tau = 5;
        let err = apply(&s, &input(5), &MockVerifier::ok()).await.unwrap_err();
        assert_eq!(err, SafroleError::BadSlot);
    }

    #[tokio::test]
    async fn rejects_tickets_on_gap_block() {
        let mut s = state();
        s.tau = 1;
        let mut inp = input(4);
        inp.tickets.push(ticket(0));
        let err = apply(&s, &inp, &MockVerifier::ok()).await.unwrap_err();
        assert_eq!(err, SafroleError::UnexpectedTicket);
    }

    #[tokio::test]
    async fn entropy_rotates_within_epoch() {
        let s = state();
        let inp = input(1);
        let (post, _) = apply(&s, &inp, &MockVerifier::ok()).await.unwrap();
        assert_eq!(post.eta[0], blake2b_256_concat(s.eta[0], inp.entropy));
        assert_eq!(post.eta[1], s.eta[1]);
        assert_eq!(post.eta[3], s.eta[3]);
        assert_eq!(post.tau, 1);
    }

    #[tokio::test]
    async fn entropy_shifts_on_epoch_change() {
        let mut s = state();
        s.tau = 11;
        let (post, _) = apply(&s, &input(12), &MockVerifier::ok()).await.unwrap();
        assert_eq!(post.eta[1], s.eta[0]);
        assert_eq!(post.eta[2], s.eta[1]);
        assert_eq!(post.eta[3], s.eta[2]);
    }

    // Scenario: enact an epoch change with no tickets; expect the epoch mark,
    // fallback seal keys and full validator rotation.
    #[tokio::test]
    async fn epoch_change_with_empty_accumulator_falls_back() {
        let mut s = state();
        s.tau = 11;
        let (post, out) = apply(&s, &input(12), &MockVerifier::ok()).await.unwrap();

        let mark = out.epoch_mark.expect("epoch mark on rotation");
        assert_eq!(mark.entropy, s.eta[0]);
        assert_eq!(mark.tickets_entropy, s.eta[1]);
        assert_eq!(mark.validators.len(), 3);

        assert_eq!(post.lambda, s.kappa);
        assert_eq!(post.kappa, s.gamma_k);
        assert_eq!(post.gamma_k, s.iota);
        assert!(post.gamma_a.is_empty());

        match post.gamma_s {
            SealKeys::Keys(keys) => {
                assert_eq!(keys.len(), 12);
                let kappa_keys: Vec<PublicKey> =
                    post.kappa.iter().map(|v| v.bandersnatch).collect();
                assert!(keys.iter().all(|k| kappa_keys.contains(k)));
            }
            SealKeys::Tickets(_) => panic!("expected fallback keys"),
        }
        assert!(!post.gamma_z.is_empty());
    }

    #[tokio::test]
    async fn offenders_are_padded_out_on_rotation() {
        let mut s = state();
        s.tau = 11;
        s.post_offenders.insert(s.iota[1].ed25519);
        let (post, _) = apply(&s, &input(12), &MockVerifier::ok()).await.unwrap();
        assert!(post.gamma_k[1].is_padding());
        assert!(!post.gamma_k[0].is_padding());
    }

    #[tokio::test]
    async fn tickets_admitted_and_sorted() {
        let s = state();
        let mut inp = input(1);
        inp.tickets = vec![ticket(0), ticket(1)];
        // forced outputs arrive in ascending order as required
        let verifier = MockVerifier::with_outputs(vec![
            Hash::from_bytes([1; 32]),
            Hash::from_bytes([2; 32]),
        ]);
        let (post, _) = apply(&s, &inp, &verifier).await.unwrap();
        assert_eq!(post.gamma_a.len(), 2);
        assert!(post.gamma_a[0].randomness < post.gamma_a[1].randomness);
        assert_eq!(post.gamma_a[0].attempt, 0);
    }

    #[tokio::test]
    async fn out_of_order_outputs_rejected() {
        let s = state();
        let mut inp = input(1);
        inp.tickets = vec![ticket(0), ticket(1)];
        let verifier = MockVerifier::with_outputs(vec![
            Hash::from_bytes([2; 32]),
            Hash::from_bytes([1; 32]),
        ]);
        let err = apply(&s, &inp, &verifier).await.unwrap_err();
        assert_eq!(err, SafroleError::BadTicketOrder);
    }

    // Scenario: two tickets with identical randomness are rejected and the
    // pre-state is untouched.
    #[tokio::test]
    async fn duplicate_randomness_rejected() {
        let s = state();
        let mut inp = input(1);
        inp.tickets = vec![ticket(0), ticket(1)];
        let verifier = MockVerifier::with_outputs(vec![
            Hash::from_bytes([1; 32]),
            Hash::from_bytes([1; 32]),
        ]);
        let err = apply(&s, &inp, &verifier).await.unwrap_err();
        assert_eq!(err, SafroleError::DuplicateTicket);
    }

    #[tokio::test]
    async fn collision_with_accumulator_rejected() {
        let mut s = state();
        s.gamma_a.push(Ticket {
            attempt: 2,
            randomness: Hash::from_bytes([1; 32]),
            proof: HexBytes::default(),
        });
        let mut inp = input(1);
        inp.tickets = vec![ticket(0)];
        let verifier = MockVerifier::with_outputs(vec![Hash::from_bytes([1; 32])]);
        let err = apply(&s, &inp, &verifier).await.unwrap_err();
        assert_eq!(err, SafroleError::DuplicateTicket);
    }

    #[tokio::test]
    async fn failed_proof_rejected() {
        let s = state();
        let mut inp = input(1);
        inp.tickets = vec![ticket(0)];
        let verifier = MockVerifier { fail_verification: true, forced_outputs: None };
        let err = apply(&s, &inp, &verifier).await.unwrap_err();
        assert_eq!(err, SafroleError::BadTicketProof);
    }

    #[tokio::test]
    async fn attempt_over_limit_rejected() {
        let s = state();
        let mut inp = input(1);
        inp.tickets = vec![ticket(3)];
        let err = apply(&s, &inp, &MockVerifier::ok()).await.unwrap_err();
        assert_eq!(err, SafroleError::BadTicketAttempt);
    }

    // Scenario: saturate the accumulator during the submission phase, then
    // cross the cutoff; expect the zig-zag tickets mark.
    #[tokio::test]
    async fn tickets_mark_on_cutoff_crossing() {
        let mut s = state();
        s.tau = 10;
        // saturated accumulator
        s.gamma_a = (0..12)
            .map(|i| Ticket {
                attempt: (i % 3) as u8,
                randomness: Hash::from_bytes([i as u8 + 1; 32]),
                proof: HexBytes::default(),
            })
            .collect();

        let (post, out) = apply(&s, &input(11), &MockVerifier::ok()).await.unwrap();
        let mark = out.tickets_mark.expect("tickets mark at cutoff");
        assert_eq!(mark.len(), 12);
        // zig-zag: first, last, second, second-to-last, ...
        assert_eq!(mark[0].id, s.gamma_a[0].randomness);
        assert_eq!(mark[1].id, s.gamma_a[11].randomness);
        assert_eq!(mark[2].id, s.gamma_a[1].randomness);
        assert_eq!(post.gamma_a.len(), 12);
        assert!(out.epoch_mark.is_none());
    }

    #[tokio::test]
    async fn saturated_immediate_rotation_seals_with_tickets() {
        let mut s = state();
        s.tau = 11; // phase 11 >= Y
        s.gamma_a = (0..12)
            .map(|i| Ticket {
                attempt: 0,
                randomness: Hash::from_bytes([i as u8 + 1; 32]),
                proof: HexBytes::default(),
            })
            .collect();

        let (post, _) = apply(&s, &input(12), &MockVerifier::ok()).await.unwrap();
        match post.gamma_s {
            SealKeys::Tickets(tickets) => {
                assert_eq!(tickets.len(), 12);
                assert_eq!(tickets[0].id, s.gamma_a[0].randomness);
                assert_eq!(tickets[1].id, s.gamma_a[11].randomness);
            }
            SealKeys::Keys(_) => panic!("expected ticketed sealing"),
        }
        assert!(post.gamma_a.is_empty());
    }

    #[test]
    fn zigzag_interleaves() {
        assert_eq!(zigzag(&[1, 2, 3, 4, 5]), vec![1, 5, 2, 4, 3]);
        assert_eq!(zigzag(&[1, 2]), vec![1, 2]);
        assert_eq!(zigzag::<u8>(&[]), Vec::<u8>::new());
    }

    #[test]
    fn fallback_keys_are_deterministic() {
        let s = state();
        let a = fallback_seal_keys(&s.eta[2], &s.kappa, 12);
        let b = fallback_seal_keys(&s.eta[2], &s.kappa, 12);
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn zigzag_is_a_permutation(values in proptest::collection::vec(any::<u16>(), 0..64)) {
                let interleaved = zigzag(&values);
                prop_assert_eq!(interleaved.len(), values.len());
                let mut sorted_in = values.clone();
                let mut sorted_out = interleaved;
                sorted_in.sort_unstable();
                sorted_out.sort_unstable();
                prop_assert_eq!(sorted_in, sorted_out);
            }

            #[test]
            fn fallback_always_selects_from_kappa(seed in proptest::array::uniform32(any::<u8>())) {
                let s = state();
                let eta2 = Hash::from_bytes(seed);
                let keys = fallback_seal_keys(&eta2, &s.kappa, s.epoch_length);
                let kappa_keys: Vec<PublicKey> =
                    s.kappa.iter().map(|v| v.bandersnatch).collect();
                prop_assert!(keys.iter().all(|k| kappa_keys.contains(k)));
            }
        }
    }
}
