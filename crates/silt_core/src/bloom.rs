//! Bloom filter guarding the disk search path.
//!
//! Answers "definitely not stored" or "maybe stored" for a key before the
//! sparse index and main file are consulted. Uses double hashing: two seeded
//! 64-bit hashes combined as `h1 + i * h2` for each of the `k` probes.

use crate::error::{CoreError, CoreResult};
use std::sync::atomic::{AtomicU64, Ordering};

/// Seeds for the two base hashes.
const SEED_LO: u64 = 0x51_7c_c1_b7_27_22_0a_95;
const SEED_HI: u64 = 0x9e_37_79_b9_7f_4a_7c_15;

/// Seeded 64-bit mix with a splitmix64-style finalizer. The finalizer's
/// avalanche keeps the two seeded hashes decorrelated, which double hashing
/// depends on: `h1` and `h2` must not differ by a mere additive constant.
fn hash(data: &[u8], seed: u64) -> u64 {
    let mut h = seed ^ (data.len() as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    for chunk in data.chunks(8) {
        let mut val = 0u64;
        for (i, &b) in chunk.iter().enumerate() {
            val |= u64::from(b) << (i * 8);
        }
        h ^= val.wrapping_mul(0xff51_afd7_ed55_8ccd);
        h = h.rotate_left(27).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    }
    h ^= h >> 30;
    h = h.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    h ^= h >> 27;
    h = h.wrapping_mul(0x94d0_49bb_1331_11eb);
    h ^= h >> 31;
    h
}

/// The two base hashes for a key, computed once and reusable across probes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct KeyHashes {
    h1: u64,
    h2: u64,
}

impl KeyHashes {
    pub(crate) fn of(key: &[u8]) -> Self {
        Self {
            h1: hash(key, SEED_LO),
            h2: hash(key, SEED_HI),
        }
    }

    fn probe(self, i: u32, bits: u64) -> u64 {
        self.h1.wrapping_add(u64::from(i).wrapping_mul(self.h2)) % bits
    }
}

/// Probabilistic membership filter over the main file's keys.
///
/// Never yields a false negative for an inserted key. False positives are
/// tracked in an atomic counter fed by the main-file search step when the
/// anchor page turns out not to contain the key.
#[derive(Debug)]
pub struct BloomFilter {
    bits: u64,
    hash_count: u32,
    words: Vec<u64>,
    false_positives: AtomicU64,
}

impl BloomFilter {
    /// Builds a filter from key hashes, sized at `bits_per_key` per key.
    pub(crate) fn build(hashes: &[KeyHashes], bits_per_key: usize, hash_count: u32) -> Self {
        let bits = (hashes.len().max(1) * bits_per_key).max(64) as u64;
        let mut filter = Self {
            bits,
            hash_count,
            words: vec![0u64; bits.div_ceil(64) as usize],
            false_positives: AtomicU64::new(0),
        };
        for &key in hashes {
            filter.insert_hashes(key);
        }
        filter
    }

    fn insert_hashes(&mut self, key: KeyHashes) {
        for i in 0..self.hash_count {
            let bit = key.probe(i, self.bits);
            self.words[(bit / 64) as usize] |= 1u64 << (bit % 64);
        }
    }

    /// Returns `false` only when the key is definitely not stored.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let hashes = KeyHashes::of(key);
        for i in 0..self.hash_count {
            let bit = hashes.probe(i, self.bits);
            if self.words[(bit / 64) as usize] & (1u64 << (bit % 64)) == 0 {
                return false;
            }
        }
        true
    }

    /// Records that the filter said "maybe" but the main file disagreed.
    pub fn record_false_positive(&self) {
        self.false_positives.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of false positives observed since the filter was built.
    #[must_use]
    pub fn false_positive_count(&self) -> u64 {
        self.false_positives.load(Ordering::Relaxed)
    }

    /// Serializes the filter: `[bits u64][hash_count u32][words...][crc u32]`.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(12 + self.words.len() * 8 + 4);
        buf.extend_from_slice(&self.bits.to_le_bytes());
        buf.extend_from_slice(&self.hash_count.to_le_bytes());
        for word in &self.words {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Deserializes a filter, verifying the checksum.
    pub(crate) fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < 16 {
            return Err(CoreError::corrupted("bloom filter file too short"));
        }
        let body = &data[..data.len() - 4];
        let stored_crc = u32::from_le_bytes(
            data[data.len() - 4..]
                .try_into()
                .map_err(|_| CoreError::corrupted("bloom filter truncated"))?,
        );
        let computed_crc = crc32fast::hash(body);
        if stored_crc != computed_crc {
            return Err(CoreError::ChecksumMismatch {
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        let bits = u64::from_le_bytes(body[0..8].try_into().unwrap_or_default());
        let hash_count = u32::from_le_bytes(body[8..12].try_into().unwrap_or_default());
        let word_bytes = &body[12..];
        if word_bytes.len() % 8 != 0 || word_bytes.len() as u64 * 8 < bits {
            return Err(CoreError::corrupted("bloom filter word block malformed"));
        }
        let words = word_bytes
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap_or_default()))
            .collect();

        Ok(Self {
            bits,
            hash_count,
            words,
            false_positives: AtomicU64::new(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn build_from_keys(keys: &[&[u8]]) -> BloomFilter {
        let hashes: Vec<KeyHashes> = keys.iter().map(|k| KeyHashes::of(k)).collect();
        BloomFilter::build(&hashes, 10, 4)
    }

    #[test]
    fn inserted_keys_are_maybe_present() {
        let filter = build_from_keys(&[b"alpha", b"beta", b"gamma"]);
        assert!(filter.may_contain(b"alpha"));
        assert!(filter.may_contain(b"beta"));
        assert!(filter.may_contain(b"gamma"));
    }

    #[test]
    fn most_absent_keys_are_rejected() {
        let keys: Vec<Vec<u8>> = (0u32..500).map(|i| i.to_be_bytes().to_vec()).collect();
        let hashes: Vec<KeyHashes> = keys.iter().map(|k| KeyHashes::of(k)).collect();
        let filter = BloomFilter::build(&hashes, 10, 4);

        let misses = (10_000u32..11_000)
            .filter(|i| !filter.may_contain(&i.to_be_bytes()))
            .count();
        // With 10 bits/key and 4 probes the false positive rate is around
        // 1%, so the large majority of absent keys must be rejected.
        assert!(misses > 900, "only {misses} of 1000 absent keys rejected");
    }

    #[test]
    fn false_positive_counter() {
        let filter = build_from_keys(&[b"a"]);
        assert_eq!(filter.false_positive_count(), 0);
        filter.record_false_positive();
        filter.record_false_positive();
        assert_eq!(filter.false_positive_count(), 2);
    }

    #[test]
    fn encode_decode_round_trip() {
        let filter = build_from_keys(&[b"one", b"two", b"three"]);
        let decoded = BloomFilter::decode(&filter.encode()).unwrap();

        assert!(decoded.may_contain(b"one"));
        assert!(decoded.may_contain(b"two"));
        assert!(decoded.may_contain(b"three"));
    }

    #[test]
    fn decode_detects_corruption() {
        let filter = build_from_keys(&[b"one"]);
        let mut encoded = filter.encode();
        encoded[13] ^= 0xff;

        assert!(matches!(
            BloomFilter::decode(&encoded),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn empty_filter_is_valid() {
        let filter = BloomFilter::build(&[], 10, 4);
        assert!(!filter.may_contain(b"anything"));
    }

    proptest! {
        #[test]
        fn no_false_negatives(keys in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..32), 1..64)) {
            let hashes: Vec<KeyHashes> = keys.iter().map(|k| KeyHashes::of(k)).collect();
            let filter = BloomFilter::build(&hashes, 10, 4);
            for key in &keys {
                prop_assert!(filter.may_contain(key));
            }
        }
    }
}
