//! Validator key file handling.
//!
//! The keys file holds one entry per validator id: an ed25519 seed plus the
//! derived public key, and optionally the bandersnatch public key used for
//! sealing. Key generation itself happens elsewhere; the node only loads.

use std::collections::BTreeMap;
use std::path::Path;

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};

use jam_crypto::ed25519;
use jam_types::{HexBytes, PublicKey};

#[derive(Debug, thiserror::Error)]
pub enum KeysError {
    #[error("cannot read keys file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed keys file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("validator {0} not present in keys file")]
    UnknownValidator(u32),

    #[error("seed for validator {0} has wrong length")]
    BadSeed(u32),
}

/// One validator's entry in the keys file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidatorKeyEntry {
    pub id: u32,
    /// ed25519 seed (32 bytes, hex).
    pub ed25519_seed: HexBytes,
    /// Derived ed25519 public key.
    pub ed25519_public: PublicKey,
    /// Bandersnatch public key, when this validator seals blocks.
    #[serde(default)]
    pub bandersnatch: Option<PublicKey>,
}

/// The parsed keys file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeysFile {
    pub validators: Vec<ValidatorKeyEntry>,
}

impl KeysFile {
    pub fn load(path: &Path) -> Result<Self, KeysError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// The signing key for `id`.
    pub fn signing_key(&self, id: u32) -> Result<SigningKey, KeysError> {
        let entry = self
            .validators
            .iter()
            .find(|v| v.id == id)
            .ok_or(KeysError::UnknownValidator(id))?;
        let seed: [u8; 32] = entry
            .ed25519_seed
            .as_slice()
            .try_into()
            .map_err(|_| KeysError::BadSeed(id))?;
        Ok(SigningKey::from_bytes(&seed))
    }

    /// Public keys by validator id, for vote verification.
    pub fn public_keys(&self) -> BTreeMap<u32, PublicKey> {
        self.validators.iter().map(|v| (v.id, v.ed25519_public)).collect()
    }

    /// Genesis validator records. Entries without an explicit bandersnatch
    /// key get a deterministic stand-in derived from the ed25519 key.
    pub fn validator_records(&self) -> Vec<jam_types::ValidatorRecord> {
        self.validators
            .iter()
            .map(|v| jam_types::ValidatorRecord {
                bandersnatch: v
                    .bandersnatch
                    .unwrap_or_else(|| PublicKey(*jam_crypto::blake2b_256(v.ed25519_public).as_bytes())),
                ed25519: v.ed25519_public,
                bls: jam_types::BlsKey::zero(),
                metadata: jam_types::Metadata::zero(),
            })
            .collect()
    }
}

/// Generate a fresh keys file for `n` validators. Used by the CLI to seed
/// local test networks.
pub fn generate(n: u32) -> KeysFile {
    let validators = (0..n)
        .map(|id| {
            let key = SigningKey::generate(&mut rand::thread_rng());
            ValidatorKeyEntry {
                id,
                ed25519_seed: HexBytes::new(key.to_bytes().to_vec()),
                ed25519_public: ed25519::verifying_key_bytes(&key),
                bandersnatch: None,
            }
        })
        .collect();
    KeysFile { validators }
}
