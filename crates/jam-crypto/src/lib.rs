//! Crypto adapters: hashing, ed25519, and the Bandersnatch VRF service client.
//!
//! Ring-VRF and IETF-VRF operations are not computed locally; they are
//! consumed from an external prover service over HTTP (see [`vrf`]). The
//! [`vrf::RingVerifier`] and [`vrf::SealProver`] traits are the seams the
//! state-transition functions and the block producer depend on, so tests can
//! substitute deterministic implementations.

pub mod ed25519;
pub mod hashing;
pub mod vrf;

pub use ed25519::{sign, verify, verifying_key_bytes};
pub use hashing::{blake2b_256, blake2b_256_concat, keccak_256, keccak_256_concat};
pub use vrf::{
    BandersnatchClient, RingVerifier, SealProver, TicketVerification, VrfConfig, VrfError,
};
