//! Bloom-style membership prefilter over indexed keys.
//!
//! Never reports a false negative: a key that was added always tests
//! positive until the filter is cleared.

use crate::constants::{PREFILTER_HASH_MASK, PREFILTER_HASH_MULTIPLIER};

#[derive(Debug, Clone)]
pub struct Prefilter {
    bits: Vec<u64>,
    num_bits: usize,
    num_hashes: usize,
    expected_elements: usize,
    false_positive_rate: f64,
    count: usize,
}

impl Prefilter {
    /// m = ceil(-n * ln(p) / ln(2)^2), k = ceil((m / n) * ln(2))
    pub fn new(expected_elements: usize, false_positive_rate: f64) -> Self {
        let n = expected_elements.max(1);
        let p = if false_positive_rate > 0.0 && false_positive_rate < 1.0 {
            false_positive_rate
        } else {
            crate::constants::DEFAULT_FALSE_POSITIVE_RATE
        };

        let ln2 = std::f64::consts::LN_2;
        let num_bits = ((-(n as f64) * p.ln()) / (ln2 * ln2)).ceil().max(1.0) as usize;
        let num_hashes = ((num_bits as f64 / n as f64) * ln2).ceil().max(1.0) as usize;

        Self {
            bits: vec![0u64; num_bits.div_ceil(64)],
            num_bits,
            num_hashes,
            expected_elements: n,
            false_positive_rate: p,
            count: 0,
        }
    }

    pub fn add(&mut self, item: &str) {
        for seed in 0..self.num_hashes {
            let idx = self.probe(item, seed);
            self.bits[idx / 64] |= 1u64 << (idx % 64);
        }
        self.count += 1;
    }

    pub fn test(&self, item: &str) -> bool {
        (0..self.num_hashes).all(|seed| {
            let idx = self.probe(item, seed);
            self.bits[idx / 64] & (1u64 << (idx % 64)) != 0
        })
    }

    pub fn clear(&mut self) {
        self.bits.iter_mut().for_each(|word| *word = 0);
        self.count = 0;
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn bit_count(&self) -> usize {
        self.num_bits
    }

    pub fn hash_count(&self) -> usize {
        self.num_hashes
    }

    pub fn expected_elements(&self) -> usize {
        self.expected_elements
    }

    pub fn target_false_positive_rate(&self) -> f64 {
        self.false_positive_rate
    }

    /// (1 - e^(-kn/m))^k for the items added so far.
    pub fn estimated_false_positive_rate(&self) -> f64 {
        let k = self.num_hashes as f64;
        let n = self.count as f64;
        let m = self.num_bits as f64;
        (1.0 - (-k * n / m).exp()).powf(k)
    }

    /// More keys were added than the filter was sized for.
    pub fn is_saturated(&self) -> bool {
        self.estimated_false_positive_rate() > self.false_positive_rate
    }

    fn probe(&self, item: &str, seed: usize) -> usize {
        (seeded_hash(item, seed as u64) % self.num_bits as u64) as usize
    }
}

/// Multiply-accumulate over character codes with the seed mixed in at every
/// step, finished with an avalanche so probes for different seeds are not
/// linear shifts of one another.
fn seeded_hash(item: &str, seed: u64) -> u64 {
    let mut h: u64 = 0;
    for ch in item.chars() {
        h = h
            .wrapping_mul(PREFILTER_HASH_MULTIPLIER)
            .wrapping_add(ch as u64)
            .wrapping_add(seed);
    }
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h & PREFILTER_HASH_MASK
}
