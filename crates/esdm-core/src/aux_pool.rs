//! Hash-conditioned auxiliary entropy pool.
//!
//! Any caller may insert data with an entropy estimate. The credit is capped
//! at the digest size of the conditioning hash, because no more entropy can
//! ever come out of one digest. The pool is drained only while seeding, as
//! the last registered source.
//!
//! Lock order: the caller holds the hash read (or write) lock and passes the
//! hash in, then the pool takes its own mutex.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use log::{debug, warn};
use zeroize::Zeroizing;

use crate::config::MAX_DIGEST_SIZE;
use crate::crypto::{Hash, HashState};
use crate::error::Result;
use crate::es::{EntropyBuf, EntropySource, EsContext};
use crate::sync::lock;

type PoolState = Option<Box<dyn HashState>>;

/// The auxiliary entropy pool.
pub struct AuxPool {
    /// Running hash; `None` until the first insert.
    state: Mutex<PoolState>,
    entropy_bits: AtomicU32,
    /// Digest size of the conditioning hash, in bytes.
    digest_size: AtomicU32,
    write_wakeup_bits: AtomicU32,
}

impl AuxPool {
    /// An empty, uninitialized pool conditioned by `hash`.
    pub fn new(hash: &dyn Hash) -> Self {
        let digest_size = hash.digest_size().min(MAX_DIGEST_SIZE) as u32;
        Self {
            state: Mutex::new(None),
            entropy_bits: AtomicU32::new(0),
            digest_size: AtomicU32::new(digest_size),
            write_wakeup_bits: AtomicU32::new(digest_size * 8),
        }
    }

    /// Digest size of the conditioning hash in bits.
    pub fn digest_bits(&self) -> u32 {
        self.digest_size.load(Ordering::Relaxed) * 8
    }

    /// Entropy currently credited to the pool, in bits.
    pub fn entropy(&self) -> u32 {
        self.entropy_bits.load(Ordering::Relaxed)
    }

    /// Overwrite the credited entropy.
    pub fn set_entropy(&self, bits: u32) {
        self.entropy_bits.store(bits.min(self.digest_bits()), Ordering::Relaxed);
    }

    /// Drop all credit. Pool contents stay: uncredited data does no harm.
    pub fn reset(&self) {
        self.entropy_bits.store(0, Ordering::Relaxed);
    }

    /// Whether the pool has absorbed any data yet.
    pub fn is_initialized(&self) -> bool {
        lock(&self.state).is_some()
    }

    /// Entropy level at which writers are considered to have filled the pool.
    pub fn write_wakeup_bits(&self) -> u32 {
        self.write_wakeup_bits.load(Ordering::Relaxed)
    }

    /// Entropy available for extraction, after the oversampling discount.
    pub fn avail(&self, ctx: &EsContext<'_>) -> u32 {
        ctx.reduce_by_osr(self.digest_bits().min(self.entropy()))
    }

    /// Mix `data` into the pool crediting at most `entropy_bits`.
    ///
    /// The credit is clamped to the data length and the pool total to the
    /// digest size. Only a failing hash update is an error.
    pub fn insert(&self, hash: &dyn Hash, data: &[u8], entropy_bits: u32) -> Result<()> {
        let mut state = lock(&self.state);
        self.insert_locked(&mut state, hash, data, entropy_bits)
    }

    fn insert_locked(
        &self,
        state: &mut PoolState,
        hash: &dyn Hash,
        data: &[u8],
        entropy_bits: u32,
    ) -> Result<()> {
        let max_bits = u32::try_from(data.len()).unwrap_or(u32::MAX).saturating_mul(8);
        let entropy_bits = entropy_bits.min(max_bits);

        if state.is_none() {
            *state = Some(hash.init()?);
        }
        if let Some(s) = state.as_mut() {
            s.update(data)?;
        }

        let cap = (hash.digest_size() * 8) as u32;
        self.credit(entropy_bits, cap);
        Ok(())
    }

    fn credit(&self, bits: u32, cap: u32) {
        let _ = self
            .entropy_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                Some(cur.saturating_add(bits).min(cap))
            });
    }

    /// Drain the pool into a fresh buffer.
    ///
    /// Returns the output bytes (`requested_bits / 8` after clamping to the
    /// digest size) and the entropy credited to them.
    pub fn extract(
        &self,
        ctx: &EsContext<'_>,
        requested_bits: u32,
    ) -> Result<(Zeroizing<Vec<u8>>, u32)> {
        let mut state = lock(&self.state);
        let mut out = Zeroizing::new(vec![0u8; MAX_DIGEST_SIZE]);
        let (len, bits) = self.extract_locked(&mut state, ctx, &mut out, requested_bits)?;
        out.truncate(len);
        Ok((out, bits))
    }

    fn extract_locked(
        &self,
        state: &mut PoolState,
        ctx: &EsContext<'_>,
        out: &mut [u8],
        requested_bits: u32,
    ) -> Result<(usize, u32)> {
        let Some(current) = state.take() else {
            return Ok((0, 0));
        };

        let digest_size = ctx.hash.digest_size();
        let digest_bits = (digest_size * 8) as u32;
        let out_bits = u32::try_from(out.len()).unwrap_or(u32::MAX).saturating_mul(8);
        let requested_bits = requested_bits
            .min(digest_bits)
            .min((MAX_DIGEST_SIZE * 8) as u32)
            .min(out_bits);
        let requested_bits_osr = requested_bits.saturating_add(ctx.oversample_bits);

        let mut collected = self.entropy_bits.swap(0, Ordering::Relaxed).min(digest_bits);
        let mut unused = 0;
        if collected > requested_bits_osr {
            unused = collected - requested_bits_osr;
            self.credit(unused, digest_bits);
            collected = requested_bits_osr;
        }
        let returned = ctx.reduce_by_osr(collected);
        debug!(
            "obtained {returned} bits by collecting {collected} bits of entropy from aux pool, {unused} bits remaining"
        );

        let mut digest = Zeroizing::new([0u8; MAX_DIGEST_SIZE]);
        let finalized = current.finalize(&mut digest[..]);
        *state = Some(ctx.hash.init()?);
        finalized?;

        let len = (requested_bits / 8) as usize;
        out[..len].copy_from_slice(&digest[..len]);
        Ok((len, returned))
    }

    /// Extract into `slot` of `eb`, then mix the whole buffer back into the
    /// pool without credit before the pool lock is released.
    pub fn extract_with_backtracking_resistance(
        &self,
        ctx: &EsContext<'_>,
        eb: &mut EntropyBuf,
        slot: usize,
        requested_bits: u32,
    ) {
        let mut state = lock(&self.state);

        let bits = match self.extract_locked(&mut state, ctx, eb.data_mut(slot), requested_bits) {
            Ok((_, bits)) => bits,
            Err(e) => {
                warn!("aux pool extraction failed: {e}");
                0
            }
        };
        eb.set_bits(slot, bits);

        let remix = eb.to_bytes();
        if let Err(e) = self.insert_locked(&mut state, ctx.hash, &remix, 0) {
            warn!("Backtracking resistance operation failed: {e}");
        }
    }

    /// Re-key the pool from `ctx.hash` to `new_hash`.
    ///
    /// The old digest is fed into the fresh state. Credit is capped at the
    /// smaller of the two digest sizes. A pool that never absorbed data only
    /// records the new digest size.
    #[cfg(feature = "crypto-switch")]
    pub fn switch_hash(&self, ctx: &EsContext<'_>, new_hash: &dyn Hash) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(current) = state.take() {
            let mut digest = Zeroizing::new([0u8; MAX_DIGEST_SIZE]);
            let finalized = current.finalize(&mut digest[..]);
            let mut fresh = new_hash.init()?;
            fresh.update(&digest[..])?;
            *state = Some(fresh);
            finalized?;
        }
        self.set_digest_size(ctx, new_hash.digest_size().min(MAX_DIGEST_SIZE) as u32);
        debug!("Re-initialize aux entropy pool with hash {}", new_hash.name());
        Ok(())
    }

    #[cfg(not(feature = "crypto-switch"))]
    pub fn switch_hash(&self, _ctx: &EsContext<'_>, _new_hash: &dyn Hash) -> Result<()> {
        Err(crate::error::EsdmError::Unsupported(
            "hash switching is not compiled in",
        ))
    }

    #[cfg(feature = "crypto-switch")]
    fn set_digest_size(&self, ctx: &EsContext<'_>, digest_size: u32) {
        let ent_bits = self.entropy_bits.swap(0, Ordering::Relaxed);
        let old_bits = self.digest_bits();
        self.digest_size.store(digest_size, Ordering::Relaxed);
        let new_bits = digest_size * 8;
        self.write_wakeup_bits
            .store(ctx.reduce_by_osr(new_bits), Ordering::Relaxed);
        self.credit(ent_bits.min(old_bits), new_bits);
    }
}

impl EntropySource for AuxPool {
    fn name(&self) -> &'static str {
        "auxiliary"
    }

    fn fill(&self, ctx: &EsContext<'_>, eb: &mut EntropyBuf, slot: usize, requested_bits: u32) {
        self.extract_with_backtracking_resistance(ctx, eb, slot, requested_bits);
    }

    fn current_entropy(&self, ctx: &EsContext<'_>, _requested_bits: u32) -> u32 {
        self.avail(ctx)
    }

    fn max_entropy(&self, _ctx: &EsContext<'_>) -> u32 {
        self.digest_bits()
    }

    fn describe(&self, ctx: &EsContext<'_>) -> String {
        format!(
            "Hash for operating entropy pool: {}, available entropy: {}",
            ctx.hash.name(),
            self.avail(ctx)
        )
    }

    fn reset(&self) {
        AuxPool::reset(self);
    }

    fn switch_hash(&self, ctx: &EsContext<'_>, new_hash: &dyn Hash) -> Result<()> {
        AuxPool::switch_hash(self, ctx, new_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Sha256Hash, Sha512Hash};

    fn ctx(hash: &dyn Hash, oversample_bits: u32) -> EsContext<'_> {
        EsContext {
            hash,
            oversample_bits,
            fully_seeded: false,
        }
    }

    #[test]
    fn credit_clamped_to_data_length() {
        let pool = AuxPool::new(&Sha256Hash);
        pool.insert(&Sha256Hash, &[1, 2], 100).unwrap();
        assert_eq!(pool.entropy(), 16);
    }

    #[test]
    fn credit_capped_at_digest_size() {
        let pool = AuxPool::new(&Sha256Hash);
        for _ in 0..10 {
            pool.insert(&Sha256Hash, &[0x5a; 64], 200).unwrap();
            assert!(pool.entropy() <= 256);
        }
        assert_eq!(pool.entropy(), 256);
    }

    #[test]
    fn first_insert_initializes() {
        let pool = AuxPool::new(&Sha256Hash);
        assert!(!pool.is_initialized());
        pool.insert(&Sha256Hash, b"x", 0).unwrap();
        assert!(pool.is_initialized());
        assert_eq!(pool.entropy(), 0);
    }

    #[test]
    fn extract_from_uninitialized_pool_is_empty() {
        let pool = AuxPool::new(&Sha256Hash);
        let (bytes, bits) = pool.extract(&ctx(&Sha256Hash, 0), 256).unwrap();
        assert!(bytes.is_empty());
        assert_eq!(bits, 0);
    }

    #[test]
    fn huge_oversampling_does_not_overflow() {
        let pool = AuxPool::new(&Sha256Hash);
        pool.insert(&Sha256Hash, &[7u8; 32], 256).unwrap();
        let (bytes, bits) = pool.extract(&ctx(&Sha256Hash, u32::MAX), 256).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(bits, 0);
        assert_eq!(pool.entropy(), 0);
    }

    #[test]
    fn extract_drains_credit() {
        let pool = AuxPool::new(&Sha256Hash);
        pool.insert(&Sha256Hash, &[7u8; 32], 256).unwrap();
        let c = ctx(&Sha256Hash, 0);
        let (bytes, bits) = pool.extract(&c, 256).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(bits, 256);
        assert_eq!(pool.entropy(), 0);
        let (_, again) = pool.extract(&c, 256).unwrap();
        assert_eq!(again, 0);
    }

    #[test]
    fn extract_returns_excess() {
        let pool = AuxPool::new(&Sha256Hash);
        pool.insert(&Sha256Hash, &[7u8; 32], 200).unwrap();
        let (bytes, bits) = pool.extract(&ctx(&Sha256Hash, 0), 128).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(bits, 128);
        assert_eq!(pool.entropy(), 72);
    }

    #[test]
    fn extract_applies_oversampling() {
        let pool = AuxPool::new(&Sha512Hash);
        pool.insert(&Sha512Hash, &[9u8; 64], 512).unwrap();
        let (_, bits) = pool.extract(&ctx(&Sha512Hash, 64), 256).unwrap();
        // 320 bits collected, 64 discounted.
        assert_eq!(bits, 256);
        assert_eq!(pool.entropy(), 192);
    }

    #[test]
    fn extract_reinitializes_state() {
        let pool = AuxPool::new(&Sha256Hash);
        pool.insert(&Sha256Hash, b"identical", 0).unwrap();
        let c = ctx(&Sha256Hash, 0);
        let (first, _) = pool.extract(&c, 256).unwrap();
        pool.insert(&Sha256Hash, b"identical", 0).unwrap();
        let (second, _) = pool.extract(&c, 256).unwrap();
        // Both are SHA-256("identical") only if the state was reset.
        assert_eq!(&first[..], &second[..]);
    }

    #[test]
    fn backtracking_remix_changes_next_output() {
        let pool = AuxPool::new(&Sha256Hash);
        let c = ctx(&Sha256Hash, 0);
        pool.insert(&Sha256Hash, b"identical", 64).unwrap();
        let mut eb = EntropyBuf::new(1);
        pool.extract_with_backtracking_resistance(&c, &mut eb, 0, 256);
        assert_eq!(eb.bits(0), 64);
        assert!(pool.is_initialized());

        pool.insert(&Sha256Hash, b"identical", 0).unwrap();
        let (next, _) = pool.extract(&c, 256).unwrap();
        assert_ne!(&eb.data(0)[..32], &next[..]);
    }

    #[test]
    fn set_entropy_and_reset() {
        let pool = AuxPool::new(&Sha256Hash);
        pool.set_entropy(1000);
        assert_eq!(pool.entropy(), 256);
        pool.reset();
        assert_eq!(pool.entropy(), 0);
    }

    #[test]
    fn avail_reduces_by_osr() {
        let pool = AuxPool::new(&Sha256Hash);
        pool.insert(&Sha256Hash, &[1u8; 32], 200).unwrap();
        assert_eq!(pool.avail(&ctx(&Sha256Hash, 64)), 136);
        assert_eq!(pool.current_entropy(&ctx(&Sha256Hash, 0), 256), 200);
        assert_eq!(pool.max_entropy(&ctx(&Sha256Hash, 0)), 256);
    }

    #[cfg(feature = "crypto-switch")]
    #[test]
    fn switch_to_smaller_digest_caps_credit() {
        let pool = AuxPool::new(&Sha512Hash);
        pool.insert(&Sha512Hash, &[3u8; 64], 512).unwrap();
        pool.switch_hash(&ctx(&Sha512Hash, 0), &Sha256Hash).unwrap();
        assert_eq!(pool.digest_bits(), 256);
        assert_eq!(pool.entropy(), 256);
        assert_eq!(pool.write_wakeup_bits(), 256);
    }

    #[cfg(feature = "crypto-switch")]
    #[test]
    fn switch_round_trip_never_gains_credit() {
        let pool = AuxPool::new(&Sha512Hash);
        pool.insert(&Sha512Hash, &[3u8; 64], 400).unwrap();
        let before = pool.entropy();
        pool.switch_hash(&ctx(&Sha512Hash, 0), &Sha256Hash).unwrap();
        pool.switch_hash(&ctx(&Sha256Hash, 0), &Sha512Hash).unwrap();
        assert!(pool.entropy() <= before);
        assert_eq!(pool.digest_bits(), 512);
    }

    #[cfg(feature = "crypto-switch")]
    #[test]
    fn switch_on_uninitialized_pool_records_digest() {
        let pool = AuxPool::new(&Sha256Hash);
        pool.switch_hash(&ctx(&Sha256Hash, 64), &Sha512Hash).unwrap();
        assert!(!pool.is_initialized());
        assert_eq!(pool.digest_bits(), 512);
        assert_eq!(pool.write_wakeup_bits(), 448);
    }

    #[cfg(not(feature = "crypto-switch"))]
    #[test]
    fn switch_unsupported_without_feature() {
        let pool = AuxPool::new(&Sha256Hash);
        assert!(matches!(
            pool.switch_hash(&ctx(&Sha256Hash, 0), &Sha512Hash),
            Err(crate::error::EsdmError::Unsupported(_))
        ));
    }
}
