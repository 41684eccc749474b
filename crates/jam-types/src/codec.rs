//! Canonical byte encoding for hashed and signed material.
//!
//! Every byte string that feeds a hash or a signature is produced here with
//! explicit little-endian integers and length-prefixed variable fields, so the
//! encoding is pinned independently of any serialization framework. JSON and
//! bincode are wire/persistence encodings only and never feed a hash.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

use crate::primitives::Hash;

/// Canonical byte accumulator.
///
/// Thin wrapper over a `Vec<u8>` so encoders read as a linear list of fields.
#[derive(Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self { buf: Vec::with_capacity(cap) }
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn bool(&mut self, v: bool) -> &mut Self {
        self.buf.push(v as u8);
        self
    }

    /// Fixed-size field: written raw, no length prefix.
    pub fn fixed(&mut self, bytes: impl AsRef<[u8]>) -> &mut Self {
        self.buf.extend_from_slice(bytes.as_ref());
        self
    }

    /// Variable-size field: 4-byte little-endian length prefix, then bytes.
    pub fn bytes(&mut self, bytes: impl AsRef<[u8]>) -> &mut Self {
        let b = bytes.as_ref();
        self.u32(b.len() as u32);
        self.buf.extend_from_slice(b);
        self
    }

    /// Optional fixed-size field: presence byte, then the field if present.
    pub fn opt_fixed(&mut self, value: Option<impl AsRef<[u8]>>) -> &mut Self {
        match value {
            Some(v) => {
                self.u8(1);
                self.fixed(v)
            }
            None => self.u8(0),
        }
    }

    /// Sequence: 4-byte little-endian count, then each item via `f`.
    pub fn seq<T>(&mut self, items: &[T], mut f: impl FnMut(&mut Self, &T)) -> &mut Self {
        self.u32(items.len() as u32);
        for item in items {
            f(self, item);
        }
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

/// blake2b-256 of arbitrary bytes; the system hash.
pub fn blake2b_256(data: impl AsRef<[u8]>) -> Hash {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(data.as_ref());
    Hash(hasher.finalize().into())
}

/// blake2b-256 over the concatenation of two byte strings.
pub fn blake2b_256_concat(a: impl AsRef<[u8]>, b: impl AsRef<[u8]>) -> Hash {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(a.as_ref());
    hasher.update(b.as_ref());
    Hash(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_layout() {
        let mut enc = Encoder::new();
        enc.u8(1).u32(2).bytes([0xaa, 0xbb]);
        assert_eq!(enc.finish(), vec![1, 2, 0, 0, 0, 2, 0, 0, 0, 0xaa, 0xbb]);
    }

    #[test]
    fn seq_prefixes_count() {
        let mut enc = Encoder::new();
        enc.seq(&[7u8, 9u8], |e, v| {
            e.u8(*v);
        });
        assert_eq!(enc.finish(), vec![2, 0, 0, 0, 7, 9]);
    }

    #[test]
    fn blake2b_known_length() {
        let h = blake2b_256(b"jam");
        assert_eq!(h.as_bytes().len(), 32);
        // stable across invocations
        assert_eq!(h, blake2b_256(b"jam"));
        assert_ne!(h, blake2b_256(b"maj"));
    }

    #[test]
    fn concat_matches_manual() {
        let joined = [b"ab".as_ref(), b"cd".as_ref()].concat();
        assert_eq!(blake2b_256_concat(b"ab", b"cd"), blake2b_256(joined));
    }
}
