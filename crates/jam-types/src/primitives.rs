//! Fixed-size byte primitives.
//!
//! All of these encode as `0x`-prefixed hex in human-readable formats (JSON)
//! and as raw bytes in binary ones (bincode), switched on
//! [`serde::Serializer::is_human_readable`].

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Error parsing a hex-encoded primitive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HexParseError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("wrong length: expected {expected} bytes, got {got}")]
    WrongLength { expected: usize, got: usize },
}

fn decode_hex(s: &str) -> Result<Vec<u8>, HexParseError> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(stripped).map_err(|e| HexParseError::InvalidHex(e.to_string()))
}

macro_rules! fixed_bytes {
    ($(#[$doc:meta])* $name:ident, $len:expr) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub const fn zero() -> Self {
                Self([0u8; $len])
            }

            pub fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub fn from_slice(slice: &[u8]) -> Result<Self, HexParseError> {
                if slice.len() != $len {
                    return Err(HexParseError::WrongLength { expected: $len, got: slice.len() });
                }
                let mut out = [0u8; $len];
                out.copy_from_slice(slice);
                Ok(Self(out))
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }

            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::zero()
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self, f)
            }
        }

        impl FromStr for $name {
            type Err = HexParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_slice(&decode_hex(s)?)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                if serializer.is_human_readable() {
                    serializer.serialize_str(&self.to_hex())
                } else {
                    serializer.serialize_bytes(&self.0)
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                if deserializer.is_human_readable() {
                    let s = String::deserialize(deserializer)?;
                    s.parse().map_err(de::Error::custom)
                } else {
                    let bytes: &[u8] = Deserialize::deserialize(deserializer)?;
                    Self::from_slice(bytes).map_err(de::Error::custom)
                }
            }
        }
    };
}

fixed_bytes!(
    /// 32-byte opaque hash.
    Hash, 32
);
fixed_bytes!(
    /// 32-byte public key (ed25519 or bandersnatch).
    PublicKey, 32
);
fixed_bytes!(
    /// 64-byte ed25519 signature.
    Signature, 64
);
fixed_bytes!(
    /// 144-byte BLS public key (carried opaquely).
    BlsKey, 144
);
fixed_bytes!(
    /// 128-byte validator metadata blob.
    Metadata, 128
);

/// Variable-length byte string with hex round-tripping in JSON.
///
/// Used for proofs, bitfields, preimage blobs and VRF material whose length
/// is not fixed by the state model.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HexBytes(pub Vec<u8>);

impl HexBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }
}

impl AsRef<[u8]> for HexBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for HexBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for HexBytes {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Display for HexBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for HexBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for HexBytes {
    type Err = HexParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(decode_hex(s)?))
    }
}

impl Serialize for HexBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for HexBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(de::Error::custom)
        } else {
            let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
            Ok(Self(bytes))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_hex_round_trip() {
        let h = Hash::from_bytes([0xab; 32]);
        let s = h.to_hex();
        assert!(s.starts_with("0x"));
        assert_eq!(s.len(), 2 + 64);
        assert_eq!(s.parse::<Hash>().unwrap(), h);
    }

    #[test]
    fn hash_json_is_hex_string() {
        let h = Hash::from_bytes([1; 32]);
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", h.to_hex()));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn signature_json_round_trip() {
        let sig = Signature::from_bytes([7; 64]);
        let json = serde_json::to_string(&sig).unwrap();
        let back: Signature = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sig);
    }

    #[test]
    fn wrong_length_rejected() {
        let err = "0xdead".parse::<Hash>().unwrap_err();
        assert_eq!(err, HexParseError::WrongLength { expected: 32, got: 2 });
    }

    #[test]
    fn hex_bytes_accepts_bare_hex() {
        let b: HexBytes = "deadbeef".parse().unwrap();
        assert_eq!(b.as_slice(), &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn binary_formats_use_raw_bytes() {
        let h = Hash::from_bytes([3; 32]);
        let bytes = bincode::serialize(&h).unwrap();
        // 8-byte length prefix + payload, no hex inflation
        assert_eq!(bytes.len(), 8 + 32);
        let back: Hash = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, h);

        let blob = HexBytes::new(vec![1, 2, 3]);
        let bytes = bincode::serialize(&blob).unwrap();
        let back: HexBytes = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, blob);
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn hex_round_trip(bytes in proptest::array::uniform32(any::<u8>())) {
                let h = Hash::from_bytes(bytes);
                prop_assert_eq!(h.to_hex().parse::<Hash>().unwrap(), h);
            }

            #[test]
            fn ordering_matches_byte_ordering(
                a in proptest::array::uniform32(any::<u8>()),
                b in proptest::array::uniform32(any::<u8>()),
            ) {
                prop_assert_eq!(Hash::from_bytes(a).cmp(&Hash::from_bytes(b)), a.cmp(&b));
            }
        }
    }
}
