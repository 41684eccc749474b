//! Validator key records.

use serde::{Deserialize, Serialize};

use crate::codec::Encoder;
use crate::primitives::{BlsKey, Metadata, PublicKey};

/// One validator's key material.
///
/// Offender slots in a validator list are filled with [`PADDING_VALIDATOR`]
/// rather than removed, so list length and indexing stay stable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorRecord {
    pub bandersnatch: PublicKey,
    pub ed25519: PublicKey,
    pub bls: BlsKey,
    pub metadata: Metadata,
}

/// All-zero record substituted for offending validators.
pub const PADDING_VALIDATOR: ValidatorRecord = ValidatorRecord {
    bandersnatch: PublicKey::zero(),
    ed25519: PublicKey::zero(),
    bls: BlsKey::zero(),
    metadata: Metadata::zero(),
};

impl ValidatorRecord {
    pub fn is_padding(&self) -> bool {
        self.bandersnatch.is_zero() && self.ed25519.is_zero()
    }

    pub fn encode_into(&self, enc: &mut Encoder) {
        enc.fixed(self.bandersnatch)
            .fixed(self.ed25519)
            .fixed(self.bls)
            .fixed(self.metadata);
    }
}

/// Copy a validator list, substituting the padding record for every entry
/// whose ed25519 key appears in `offenders`.
pub fn replace_offenders_with_padding<'a>(
    validators: &[ValidatorRecord],
    offenders: impl IntoIterator<Item = &'a PublicKey>,
) -> Vec<ValidatorRecord> {
    let offender_set: std::collections::BTreeSet<&PublicKey> = offenders.into_iter().collect();
    validators
        .iter()
        .map(|v| {
            if offender_set.contains(&v.ed25519) {
                PADDING_VALIDATOR.clone()
            } else {
                v.clone()
            }
        })
        .collect()
}
