use sampler::operation::MAX_KEY_LEN;

use crate::generator::Generator;

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Maps record indices to keys. The same index always yields the same key, so the load phase
/// and the measured phase agree on the keyspace without sharing state.
#[derive(Clone, Debug)]
pub struct KeyGenerator {
    keysize: Generator,
    min_len: usize,
}

impl KeyGenerator {
    pub fn new(keysize: Generator, records: u64) -> Self {
        Self {
            keysize,
            min_len: digits(records.max(1)),
        }
    }

    /// Zero-padded decimal index whose width is drawn from the key-size distribution at a
    /// point derived from the index hash.
    pub fn generate(&self, index: u64) -> String {
        let u = fnv_64(index) as f64 / u64::MAX as f64;
        let drawn = self.keysize.generate_at(u).round();
        // NaN and negative widths fall back to the minimum
        let len = if drawn.is_nan() || drawn < 0.0 {
            0
        } else {
            drawn.min(MAX_KEY_LEN as f64) as usize
        };
        let len = len.max(self.min_len).min(MAX_KEY_LEN);

        format!("{index:0len$}")
    }
}

/// FNV-1a over the little-endian bytes of `value`.
pub fn fnv_64(value: u64) -> u64 {
    value
        .to_le_bytes()
        .iter()
        .fold(FNV_OFFSET_BASIS, |hash, &byte| {
            (hash ^ byte as u64).wrapping_mul(FNV_PRIME)
        })
}

fn digits(n: u64) -> usize {
    n.ilog10() as usize + 1
}
