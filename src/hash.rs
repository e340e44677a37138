//! BLAKE2b-256: the single cryptographic primitive the core depends on
//! (spec §4.2). Used for the schema fingerprint and the layout fingerprint.
//!
//! Deterministic, side-effect free, single call. Every struct serialised
//! into the hash must be value-initialised (no padding bytes) in canonical
//! little-endian form — callers build a flat `Vec<u8>` (or write directly
//! into a `Blake2bBuilder`) field by field rather than hashing a `repr(C)`
//! struct's raw bytes, so that padding never leaks into the digest.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

type Blake2b256 = Blake2b<U32>;

/// A 32-byte BLAKE2b digest.
pub type Digest32 = [u8; 32];

/// Hash a byte slice with BLAKE2b-256.
pub fn blake2b_256(data: &[u8]) -> Digest32 {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&out);
    digest
}

/// Returns true iff `recomputed` equals `stored`, byte for byte.
///
/// A named function rather than a bare `==` so call sites read as an
/// explicit integrity check rather than an incidental comparison, and so
/// the single comparison point is easy to find when reviewing the
/// integrity-failure paths in spec §7.
pub fn verify(stored: &Digest32, recomputed: &Digest32) -> bool {
    stored == recomputed
}

/// Incrementally builds the canonical little-endian byte sequence that
/// feeds a fingerprint hash, so every call site serialises fields in the
/// same order and width instead of hand-rolling `to_le_bytes` chains.
#[derive(Default)]
pub struct Blake2bBuilder {
    buf: Vec<u8>,
}

impl Blake2bBuilder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn push_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn push_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn push_u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn push_bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    pub fn finish(&self) -> Digest32 {
        blake2b_256(&self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_and_sensitive_to_input() {
        let a = blake2b_256(b"hello");
        let b = blake2b_256(b"hello");
        let c = blake2b_256(b"hellp");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(verify(&a, &b));
        assert!(!verify(&a, &c));
    }

    #[test]
    fn builder_matches_manual_concatenation() {
        let mut manual = Vec::new();
        manual.extend_from_slice(&42u32.to_le_bytes());
        manual.extend_from_slice(&7u64.to_le_bytes());
        manual.push(9);
        let expected = blake2b_256(&manual);

        let mut builder = Blake2bBuilder::new();
        builder.push_u32(42).push_u64(7).push_u8(9);
        assert_eq!(builder.finish(), expected);
    }
}
