//! Operating system RNG wrapped as a noise source.

use log::warn;

use super::{EntropyBuf, EntropySource, EsContext, fast_noise_entropylevel};
use crate::config::DRNG_SECURITY_STRENGTH_BITS;

/// OS RNG output is trusted at full rate unless configured otherwise.
pub const DEFAULT_SYSTEM_ENTROPY_RATE: u32 = DRNG_SECURITY_STRENGTH_BITS;

/// Entropy source reading the OS RNG through `getrandom`.
#[derive(Debug, Clone)]
pub struct SystemSource {
    entropy_rate: u32,
}

impl SystemSource {
    /// Source crediting `entropy_rate` bits per 256 bits of output.
    pub fn new(entropy_rate: u32) -> Self {
        Self {
            entropy_rate: entropy_rate.min(DRNG_SECURITY_STRENGTH_BITS),
        }
    }
}

impl Default for SystemSource {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_ENTROPY_RATE)
    }
}

impl EntropySource for SystemSource {
    fn name(&self) -> &'static str {
        "system"
    }

    fn fill(&self, _ctx: &EsContext<'_>, eb: &mut EntropyBuf, slot: usize, requested_bits: u32) {
        let out = eb.data_mut(slot);
        let len = ((requested_bits / 8) as usize).min(out.len());
        let credit = match getrandom::fill(&mut out[..len]) {
            Ok(()) => fast_noise_entropylevel(self.entropy_rate, requested_bits),
            Err(e) => {
                warn!("system RNG read failed: {e}");
                0
            }
        };
        eb.set_bits(slot, credit);
    }

    fn current_entropy(&self, _ctx: &EsContext<'_>, requested_bits: u32) -> u32 {
        fast_noise_entropylevel(self.entropy_rate, requested_bits)
    }

    fn max_entropy(&self, _ctx: &EsContext<'_>) -> u32 {
        fast_noise_entropylevel(self.entropy_rate, DRNG_SECURITY_STRENGTH_BITS)
    }

    fn describe(&self, _ctx: &EsContext<'_>) -> String {
        format!(
            "OS RNG via getrandom, {} bits of entropy per {} bits of output",
            self.entropy_rate, DRNG_SECURITY_STRENGTH_BITS
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Sha256Hash;

    fn ctx() -> EsContext<'static> {
        EsContext {
            hash: &Sha256Hash,
            oversample_bits: 0,
            fully_seeded: true,
        }
    }

    #[test]
    fn fills_and_credits_full_rate() {
        let src = SystemSource::default();
        let mut eb = EntropyBuf::new(2);
        src.fill(&ctx(), &mut eb, 1, 256);
        assert_eq!(eb.bits(1), 256);
        assert_eq!(eb.bits(0), 0);
        assert!(eb.data(1)[..32].iter().any(|&b| b != 0));
    }

    #[test]
    fn zero_rate_credits_nothing() {
        let src = SystemSource::new(0);
        let mut eb = EntropyBuf::new(1);
        src.fill(&ctx(), &mut eb, 0, 256);
        assert_eq!(eb.bits(0), 0);
        assert_eq!(src.current_entropy(&ctx(), 256), 0);
    }
}
