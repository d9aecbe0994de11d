//! Entropy source interface, seed buffer and source registry.
//!
//! Every noise source implements [`EntropySource`]. The [`EsRegistry`] keeps
//! them in a fixed order (fast sources first, the auxiliary pool last) and
//! every consumer iterates that order. The auxiliary pool must come last: its
//! extraction mixes the whole seed buffer back into the pool, which only
//! covers the other sources' contributions if they were filled before it.

pub mod jitter;
pub mod system;

use std::sync::Arc;

use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::aux_pool::AuxPool;
use crate::config::{DRNG_SECURITY_STRENGTH_BITS, INIT_SEED_SIZE_BYTES};
use crate::crypto::Hash;
use crate::error::Result;

pub use jitter::JitterSource;
pub use system::SystemSource;

/// Environment a source callback runs in.
///
/// Carries what the sources need from the managers without handing them the
/// managers themselves: the current conditioning hash, the oversampling
/// rate and the global fully-seeded state.
#[derive(Clone, Copy)]
pub struct EsContext<'a> {
    /// Conditioning hash in use. Held under the hash read lock by the caller.
    pub hash: &'a dyn Hash,
    /// Extra bits requested while oversampling; zero when disabled.
    pub oversample_bits: u32,
    /// Whether the service reached the fully seeded level.
    pub fully_seeded: bool,
}

impl EsContext<'_> {
    /// Discount the oversampling rate from an entropy amount.
    pub fn reduce_by_osr(&self, entropy_bits: u32) -> u32 {
        entropy_bits.saturating_sub(self.oversample_bits)
    }
}

/// Trait every noise source implements.
pub trait EntropySource: Send + Sync {
    /// Short, unique source name.
    fn name(&self) -> &'static str;

    /// Fill slot `slot` of `eb` with data carrying up to `requested_bits` of
    /// entropy and record the credited amount in that slot.
    fn fill(&self, ctx: &EsContext<'_>, eb: &mut EntropyBuf, slot: usize, requested_bits: u32);

    /// Entropy in bits the source can deliver right now for a request of
    /// `requested_bits`.
    fn current_entropy(&self, ctx: &EsContext<'_>, requested_bits: u32) -> u32;

    /// Most entropy the source can ever deliver in one request.
    fn max_entropy(&self, ctx: &EsContext<'_>) -> u32;

    /// Human-readable state.
    fn describe(&self, ctx: &EsContext<'_>) -> String;

    /// Drop all entropy credit.
    fn reset(&self) {}

    /// Re-key the source to a new conditioning hash. `ctx.hash` is the hash
    /// being replaced.
    fn switch_hash(&self, _ctx: &EsContext<'_>, _new_hash: &dyn Hash) -> Result<()> {
        Ok(())
    }
}

/// Entropy statement for a fast noise source delivering `ent_bits` of
/// entropy per [`DRNG_SECURITY_STRENGTH_BITS`] of data, scaled to
/// `requested_bits` and capped at the request.
pub fn fast_noise_entropylevel(ent_bits: u32, requested_bits: u32) -> u32 {
    let scaled = u64::from(ent_bits) * u64::from(requested_bits)
        / u64::from(DRNG_SECURITY_STRENGTH_BITS);
    (scaled as u32).min(requested_bits)
}

#[derive(Clone, Zeroize)]
struct Slot {
    data: [u8; INIT_SEED_SIZE_BYTES],
    bits: u32,
}

/// Seed material collected from all sources for one seeding attempt.
///
/// One slot per registered source. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EntropyBuf {
    slots: Vec<Slot>,
    now: u64,
}

impl EntropyBuf {
    /// An empty buffer with `n` slots.
    pub fn new(n: usize) -> Self {
        Self {
            slots: vec![
                Slot {
                    data: [0u8; INIT_SEED_SIZE_BYTES],
                    bits: 0,
                };
                n
            ],
            now: 0,
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Seed bytes of `slot`.
    pub fn data(&self, slot: usize) -> &[u8] {
        &self.slots[slot].data
    }

    /// Writable seed bytes of `slot`.
    pub fn data_mut(&mut self, slot: usize) -> &mut [u8] {
        &mut self.slots[slot].data
    }

    /// Entropy credited to `slot`.
    pub fn bits(&self, slot: usize) -> u32 {
        self.slots[slot].bits
    }

    pub fn set_bits(&mut self, slot: usize, bits: u32) {
        self.slots[slot].bits = bits;
    }

    /// Withdraw every slot's entropy credit; the bytes stay.
    pub fn clear_bits(&mut self) {
        for slot in &mut self.slots {
            slot.bits = 0;
        }
    }

    /// Entropy credited across all slots.
    pub fn total_bits(&self) -> u32 {
        self.slots
            .iter()
            .fold(0u32, |acc, s| acc.saturating_add(s.bits))
    }

    /// Stamp the buffer with a time value mixed into every seed.
    pub fn set_now(&mut self, now: u64) {
        self.now = now;
    }

    /// The whole buffer serialized as seed material.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Vec::with_capacity(self.slots.len() * (INIT_SEED_SIZE_BYTES + 4) + 8);
        for slot in &self.slots {
            out.extend_from_slice(&slot.data);
            out.extend_from_slice(&slot.bits.to_le_bytes());
        }
        out.extend_from_slice(&self.now.to_le_bytes());
        Zeroizing::new(out)
    }
}

/// Ordered list of noise sources with the auxiliary pool last.
pub struct EsRegistry {
    sources: Vec<Arc<dyn EntropySource>>,
}

impl EsRegistry {
    /// Register `fast` sources in order, followed by `aux`.
    pub fn new(fast: Vec<Arc<dyn EntropySource>>, aux: Arc<AuxPool>) -> Self {
        let mut sources = fast;
        sources.push(aux);
        Self { sources }
    }

    /// Number of registered sources, the auxiliary pool included.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Sources in registry order; the slot index of a source is its position.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn EntropySource>> {
        self.sources.iter()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Sha256Hash;

    #[test]
    fn fast_noise_scales_and_caps() {
        assert_eq!(fast_noise_entropylevel(256, 256), 256);
        assert_eq!(fast_noise_entropylevel(16, 256), 16);
        assert_eq!(fast_noise_entropylevel(16, 384), 24);
        assert_eq!(fast_noise_entropylevel(512, 128), 128);
        assert_eq!(fast_noise_entropylevel(0, 256), 0);
    }

    #[test]
    fn entropy_buf_totals_and_clears() {
        let mut eb = EntropyBuf::new(3);
        eb.set_bits(0, 10);
        eb.set_bits(2, 20);
        assert_eq!(eb.total_bits(), 30);
        eb.data_mut(1)[0] = 0xaa;
        eb.clear_bits();
        assert_eq!(eb.total_bits(), 0);
        assert_eq!(eb.data(1)[0], 0xaa);
    }

    #[test]
    fn entropy_buf_serializes_every_slot() {
        let mut eb = EntropyBuf::new(2);
        eb.set_now(7);
        let bytes = eb.to_bytes();
        assert_eq!(bytes.len(), 2 * (INIT_SEED_SIZE_BYTES + 4) + 8);
        assert_eq!(&bytes[bytes.len() - 8..], &7u64.to_le_bytes());
    }

    #[test]
    fn registry_puts_aux_last() {
        let aux = Arc::new(AuxPool::new(&Sha256Hash));
        let fast: Vec<Arc<dyn EntropySource>> = vec![
            Arc::new(SystemSource::default()),
            Arc::new(JitterSource::default()),
        ];
        let registry = EsRegistry::new(fast, aux);
        assert_eq!(registry.names(), vec!["system", "jitter", "auxiliary"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn reduce_by_osr_saturates() {
        let ctx = EsContext {
            hash: &Sha256Hash,
            oversample_bits: 64,
            fully_seeded: false,
        };
        assert_eq!(ctx.reduce_by_osr(100), 36);
        assert_eq!(ctx.reduce_by_osr(10), 0);
    }
}
