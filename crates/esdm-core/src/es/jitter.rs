//! CPU timing-jitter noise source.
//!
//! Times a short memory-touching loop with the monotonic clock many times
//! over, turns consecutive timing deltas into bytes, and conditions them with
//! SHA-512 into the source's seed slot. Only a conservative fraction of the
//! requested bits is credited.

use std::hint::black_box;
use std::time::Instant;

use sha2::{Digest, Sha512};
use zeroize::Zeroize;

use super::{EntropyBuf, EntropySource, EsContext, fast_noise_entropylevel};
use crate::config::DRNG_SECURITY_STRENGTH_BITS;

/// Default entropy credit per 256 bits of conditioned output.
pub const DEFAULT_JITTER_ENTROPY_RATE: u32 = 16;
/// Raw timing bytes gathered per requested output byte.
const OVERSAMPLE_FACTOR: usize = 32;

/// Timing-jitter entropy source.
#[derive(Debug, Clone)]
pub struct JitterSource {
    entropy_rate: u32,
}

impl JitterSource {
    /// Source crediting `entropy_rate` bits per 256 bits of output.
    pub fn new(entropy_rate: u32) -> Self {
        Self {
            entropy_rate: entropy_rate.min(DRNG_SECURITY_STRENGTH_BITS),
        }
    }

    fn sample(n_samples: usize) -> Vec<u8> {
        let origin = Instant::now();
        let mut scratch = [0u64; 64];
        let mut timings = Vec::with_capacity(n_samples + 2);
        for i in 0..n_samples + 2 {
            for (j, cell) in scratch.iter_mut().enumerate() {
                *cell = black_box(cell.wrapping_mul(31).wrapping_add((i ^ j) as u64));
            }
            timings.push(origin.elapsed().as_nanos() as u64);
        }
        extract_timing_entropy(&timings, n_samples)
    }
}

impl Default for JitterSource {
    fn default() -> Self {
        Self::new(DEFAULT_JITTER_ENTROPY_RATE)
    }
}

impl EntropySource for JitterSource {
    fn name(&self) -> &'static str {
        "jitter"
    }

    fn fill(&self, _ctx: &EsContext<'_>, eb: &mut EntropyBuf, slot: usize, requested_bits: u32) {
        let out = eb.data_mut(slot);
        let len = ((requested_bits / 8) as usize).min(out.len());
        let mut raw = Self::sample(len.max(1) * OVERSAMPLE_FACTOR);

        for (counter, chunk) in (0u32..).zip(out[..len].chunks_mut(64)) {
            let mut block = Sha512::new()
                .chain_update(counter.to_le_bytes())
                .chain_update(&raw)
                .finalize();
            chunk.copy_from_slice(&block[..chunk.len()]);
            block.as_mut_slice().zeroize();
        }
        raw.zeroize();

        eb.set_bits(slot, fast_noise_entropylevel(self.entropy_rate, requested_bits));
    }

    fn current_entropy(&self, _ctx: &EsContext<'_>, requested_bits: u32) -> u32 {
        fast_noise_entropylevel(self.entropy_rate, requested_bits)
    }

    fn max_entropy(&self, _ctx: &EsContext<'_>) -> u32 {
        fast_noise_entropylevel(self.entropy_rate, DRNG_SECURITY_STRENGTH_BITS)
    }

    fn describe(&self, _ctx: &EsContext<'_>) -> String {
        format!(
            "Timing jitter, {} bits of entropy per {} bits of output",
            self.entropy_rate, DRNG_SECURITY_STRENGTH_BITS
        )
    }
}

/// XOR-fold all 8 bytes of `v` into one.
fn xor_fold_u64(v: u64) -> u8 {
    v.to_le_bytes().iter().fold(0, |acc, b| acc ^ b)
}

/// Turn raw timestamps into at most `n_samples` bytes: consecutive deltas,
/// adjacent deltas XORed together, each folded down to one byte.
fn extract_timing_entropy(timings: &[u64], n_samples: usize) -> Vec<u8> {
    if timings.len() < 3 {
        return Vec::new();
    }
    let deltas: Vec<u64> = timings
        .windows(2)
        .map(|w| w[1].wrapping_sub(w[0]))
        .collect();
    let mut raw: Vec<u8> = deltas
        .windows(2)
        .map(|w| xor_fold_u64(w[0] ^ w[1]))
        .collect();
    raw.truncate(n_samples);
    raw
}
