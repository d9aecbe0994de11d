//! Entropy source manager: seeding state machine and seed buffer filling.
//!
//! The manager tracks how far the service got on the way to full seeding:
//!
//! ```text
//! Unseeded --32 bits--> InitEntropy --128 bits--> MinSeeded
//!          --security strength (+ oversampling)--> FullySeeded --> Operational
//! ```
//!
//! Stages only move forward, except through an explicit demotion or reset.
//! It also owns the "reseed in progress" gate: a compare-and-swap flag that
//! lets at most one reseed run at a time without ever blocking the caller.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info};
use serde::Serialize;

use crate::aux_pool::AuxPool;
use crate::config::{
    EsdmConfig, FULL_SEED_ENTROPY_BITS, INIT_ENTROPY_BITS, MIN_SEED_ENTROPY_BITS,
};
use crate::crypto::Hash;
use crate::error::{EsdmError, Result};
use crate::es::{EntropyBuf, EsContext, EsRegistry};
use crate::sync::lock;

/// Externally visible seeding stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedStage {
    Unseeded,
    InitEntropy,
    MinSeeded,
    FullySeeded,
    Operational,
}

/// Seeding state machine over a fixed source registry.
pub struct EsManager {
    registry: EsRegistry,
    aux: Arc<AuxPool>,

    sp80090c_compliant: bool,
    oversample_es_bits: u32,
    seed_buffer_init_add_bits: u32,

    operational: AtomicBool,
    fully_seeded: AtomicBool,
    min_seeded: AtomicBool,
    all_sources_fully_seeded: AtomicBool,
    /// Available entropy needed before an entropy arrival triggers a reseed.
    entropy_thresh: AtomicU32,
    reseed_in_progress: AtomicBool,

    init_wait: Mutex<()>,
    init_cond: Condvar,
}

impl EsManager {
    pub fn new(config: &EsdmConfig, registry: EsRegistry, aux: Arc<AuxPool>) -> Self {
        Self {
            registry,
            aux,
            sp80090c_compliant: config.sp80090c_compliant,
            oversample_es_bits: config.oversample_es_bits,
            seed_buffer_init_add_bits: config.seed_buffer_init_add_bits,
            operational: AtomicBool::new(false),
            fully_seeded: AtomicBool::new(false),
            min_seeded: AtomicBool::new(false),
            all_sources_fully_seeded: AtomicBool::new(false),
            entropy_thresh: AtomicU32::new(INIT_ENTROPY_BITS),
            reseed_in_progress: AtomicBool::new(false),
            init_wait: Mutex::new(()),
            init_cond: Condvar::new(),
        }
    }

    pub fn registry(&self) -> &EsRegistry {
        &self.registry
    }

    pub fn sp80090c_compliant(&self) -> bool {
        self.sp80090c_compliant
    }

    pub fn is_operational(&self) -> bool {
        self.operational.load(Ordering::Acquire)
    }

    pub fn is_fully_seeded(&self) -> bool {
        self.fully_seeded.load(Ordering::Acquire)
    }

    pub fn is_min_seeded(&self) -> bool {
        self.min_seeded.load(Ordering::Acquire)
    }

    pub fn all_sources_fully_seeded(&self) -> bool {
        self.all_sources_fully_seeded.load(Ordering::Acquire)
    }

    pub fn set_all_sources_fully_seeded(&self, set: bool) {
        self.all_sources_fully_seeded.store(set, Ordering::Release);
    }

    pub fn entropy_thresh(&self) -> u32 {
        self.entropy_thresh.load(Ordering::Relaxed)
    }

    /// Set the entropy threshold for entropy-triggered reseeds.
    pub fn set_entropy_thresh(&self, bits: u32) {
        self.entropy_thresh.store(bits, Ordering::Relaxed);
    }

    pub fn seed_stage(&self) -> SeedStage {
        if self.is_operational() {
            SeedStage::Operational
        } else if self.is_fully_seeded() {
            SeedStage::FullySeeded
        } else if self.is_min_seeded() {
            SeedStage::MinSeeded
        } else if self.entropy_thresh() > INIT_ENTROPY_BITS {
            SeedStage::InitEntropy
        } else {
            SeedStage::Unseeded
        }
    }

    /// Extra bits requested on top of every seed request while oversampling.
    pub fn oversample_extra_bits(&self) -> u32 {
        if self.sp80090c_compliant && !self.all_sources_fully_seeded() {
            self.oversample_es_bits
        } else {
            0
        }
    }

    /// Source callback environment for the conditioning hash `hash`.
    pub fn context<'a>(&self, hash: &'a dyn Hash) -> EsContext<'a> {
        EsContext {
            hash,
            oversample_bits: self.oversample_extra_bits(),
            fully_seeded: self.is_fully_seeded(),
        }
    }

    /// Security strength the conditioning hash can back.
    pub fn security_strength_bits(&self) -> u32 {
        FULL_SEED_ENTROPY_BITS.min(self.aux.digest_bits())
    }

    /// Seed entropy required for a DRNG in the given seeding state.
    pub fn seed_entropy_osr(&self, fully_seeded: bool) -> u32 {
        let mut bits = self.security_strength_bits();
        if self.sp80090c_compliant && !fully_seeded {
            bits += self.seed_buffer_init_add_bits;
        }
        bits
    }

    fn avail_entropy_thresh(&self) -> u32 {
        self.seed_entropy_osr(self.all_sources_fully_seeded())
    }

    /// Entropy all registered sources can deliver right now.
    pub fn available_entropy(&self, ctx: &EsContext<'_>) -> u32 {
        let thresh = self.avail_entropy_thresh();
        self.registry
            .iter()
            .fold(0u32, |acc, es| acc.saturating_add(es.current_entropy(ctx, thresh)))
    }

    /// Whether the credit in `eb` is enough to call a DRNG fully seeded.
    pub fn fully_seeded_eb(&self, drng_fully_seeded: bool, eb: &EntropyBuf) -> bool {
        eb.total_bits() >= self.seed_entropy_osr(drng_fully_seeded)
    }

    /// Pull `requested_bits` from every source into `eb`, in registry order.
    ///
    /// Once fully seeded, a reseed is refused (every slot credited zero) if
    /// the sources cannot currently back the minimum reseed entropy.
    pub fn fill_seed_buffer(&self, ctx: &EsContext<'_>, eb: &mut EntropyBuf, requested_bits: u32) {
        let required = if self.sp80090c_compliant {
            self.security_strength_bits()
        } else {
            MIN_SEED_ENTROPY_BITS
        };

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        eb.set_now(now);

        if self.is_fully_seeded() && self.available_entropy(ctx) < required {
            debug!("insufficient entropy for reseed, need {required} bits");
            eb.clear_bits();
            return;
        }

        for (slot, es) in self.registry.iter().enumerate() {
            es.fill(ctx, eb, slot, requested_bits);
        }
    }

    /// Advance the seeding stage.
    ///
    /// `eb` is the buffer just injected into the DRNG; without one the stage
    /// is derived from what the sources report as available.
    pub fn init_ops(&self, ctx: &EsContext<'_>, eb: Option<&EntropyBuf>) {
        if self.is_operational() {
            return;
        }

        let requested_bits = self.seed_entropy_osr(self.all_sources_fully_seeded());
        let seed_bits = match eb {
            Some(eb) => eb.total_bits(),
            None => {
                let thresh = self.avail_entropy_thresh();
                self.registry
                    .iter()
                    .fold(0u32, |acc, es| acc.saturating_add(es.current_entropy(ctx, thresh)))
            }
        };

        if self.is_fully_seeded() {
            self.set_operational();
            self.set_entropy_thresh(requested_bits);
        } else if seed_bits >= requested_bits {
            self.min_seeded.store(true, Ordering::Release);
            self.fully_seeded.store(true, Ordering::Release);
            self.set_operational();
            info!("ESDM fully seeded with {seed_bits} bits of entropy");
            self.set_entropy_thresh(requested_bits);
        } else if !self.is_min_seeded() {
            if seed_bits >= MIN_SEED_ENTROPY_BITS {
                self.min_seeded.store(true, Ordering::Release);
                info!("ESDM minimally seeded with {seed_bits} bits of entropy");
                self.set_entropy_thresh(requested_bits);
                self.wake_waiters();
            } else if seed_bits >= INIT_ENTROPY_BITS {
                info!("ESDM initial entropy level {seed_bits} bits of entropy");
                self.set_entropy_thresh(MIN_SEED_ENTROPY_BITS);
            }
        }
    }

    fn set_operational(&self) {
        if self.is_fully_seeded() {
            self.operational.store(true, Ordering::Release);
            self.wake_waiters();
            info!("ESDM fully operational");
        }
    }

    /// Try to take the reseed gate after new entropy arrived.
    ///
    /// Returns `true` if the caller now owns the gate and must run a reseed,
    /// then release it with [`EsManager::unlock_reseed`].
    pub fn try_begin_reseed(&self, ctx: &EsContext<'_>) -> bool {
        if self.all_sources_fully_seeded() {
            return false;
        }
        if self.available_entropy(ctx) < self.entropy_thresh() {
            return false;
        }
        self.try_lock_reseed()
    }

    /// Non-blocking acquisition of the reseed gate.
    pub fn try_lock_reseed(&self) -> bool {
        self.reseed_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn unlock_reseed(&self) {
        self.reseed_in_progress.store(false, Ordering::Release);
    }

    pub fn reseed_in_progress(&self) -> bool {
        self.reseed_in_progress.load(Ordering::Acquire)
    }

    /// Leave the operational state after the DRNG lost its full seeding.
    ///
    /// Returns `true` if the service was operational and got demoted.
    pub fn demote(&self) -> bool {
        self.set_all_sources_fully_seeded(false);
        if !self.is_operational() {
            return false;
        }
        debug!("ESDM set to non-operational");
        self.operational.store(false, Ordering::Release);
        self.fully_seeded.store(false, Ordering::Release);
        true
    }

    /// Drop every source's credit and the whole seeding state.
    pub fn reset_state(&self) {
        for es in self.registry.iter() {
            es.reset();
        }
        self.operational.store(false, Ordering::Release);
        self.fully_seeded.store(false, Ordering::Release);
        self.min_seeded.store(false, Ordering::Release);
        self.all_sources_fully_seeded.store(false, Ordering::Release);
        debug!("reset ESDM");
    }

    /// Wait until operational. With `nonblock` return
    /// [`EsdmError::WouldBlock`] instead of waiting.
    pub fn sleep_while_nonoperational(&self, nonblock: bool) -> Result<()> {
        if self.is_operational() {
            return Ok(());
        }
        if nonblock {
            return Err(EsdmError::WouldBlock);
        }
        let guard = lock(&self.init_wait);
        let _guard = self
            .init_cond
            .wait_while(guard, |_| !self.is_operational())
            .unwrap_or_else(PoisonError::into_inner);
        Ok(())
    }

    /// Wait until at least minimally seeded.
    pub fn sleep_while_not_min_seeded(&self) -> Result<()> {
        let seeded = || self.is_min_seeded() || self.is_fully_seeded();
        if seeded() {
            return Ok(());
        }
        let guard = lock(&self.init_wait);
        let _guard = self
            .init_cond
            .wait_while(guard, |_| !seeded())
            .unwrap_or_else(PoisonError::into_inner);
        Ok(())
    }

    fn wake_waiters(&self) {
        let _guard = lock(&self.init_wait);
        self.init_cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Sha256Hash, Sha512Hash};
    use crate::es::EntropySource;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    struct FixedSource {
        bits: u32,
    }

    impl EntropySource for FixedSource {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn fill(&self, _ctx: &EsContext<'_>, eb: &mut EntropyBuf, slot: usize, requested: u32) {
            eb.data_mut(slot)[0] = 0x42;
            eb.set_bits(slot, self.bits.min(requested));
        }

        fn current_entropy(&self, _ctx: &EsContext<'_>, requested: u32) -> u32 {
            self.bits.min(requested)
        }

        fn max_entropy(&self, _ctx: &EsContext<'_>) -> u32 {
            self.bits
        }

        fn describe(&self, _ctx: &EsContext<'_>) -> String {
            String::new()
        }
    }

    fn manager(config: &EsdmConfig, fast_bits: Option<u32>) -> (EsManager, Arc<AuxPool>) {
        let aux = Arc::new(AuxPool::new(&Sha256Hash));
        let fast: Vec<Arc<dyn EntropySource>> = match fast_bits {
            Some(bits) => vec![Arc::new(FixedSource { bits })],
            None => Vec::new(),
        };
        let registry = EsRegistry::new(fast, Arc::clone(&aux));
        (EsManager::new(config, registry, Arc::clone(&aux)), aux)
    }

    fn buf_with(bits: u32) -> EntropyBuf {
        let mut eb = EntropyBuf::new(1);
        eb.set_bits(0, bits);
        eb
    }

    #[test]
    fn stages_advance_in_order() {
        let (es, _) = manager(&EsdmConfig::default(), None);
        let ctx = es.context(&Sha256Hash);
        assert_eq!(es.seed_stage(), SeedStage::Unseeded);

        es.init_ops(&ctx, Some(&buf_with(40)));
        assert_eq!(es.seed_stage(), SeedStage::InitEntropy);
        assert_eq!(es.entropy_thresh(), MIN_SEED_ENTROPY_BITS);

        es.init_ops(&ctx, Some(&buf_with(130)));
        assert_eq!(es.seed_stage(), SeedStage::MinSeeded);
        assert_eq!(es.entropy_thresh(), 256);

        es.init_ops(&ctx, Some(&buf_with(256)));
        assert_eq!(es.seed_stage(), SeedStage::Operational);
        assert!(es.is_fully_seeded() && es.is_min_seeded());
    }

    #[test]
    fn too_little_entropy_changes_nothing() {
        let (es, _) = manager(&EsdmConfig::default(), None);
        es.init_ops(&es.context(&Sha256Hash), Some(&buf_with(31)));
        assert_eq!(es.seed_stage(), SeedStage::Unseeded);
        assert_eq!(es.entropy_thresh(), INIT_ENTROPY_BITS);
    }

    #[test]
    fn init_ops_without_buffer_uses_source_estimates() {
        let (es, aux) = manager(&EsdmConfig::default(), Some(100));
        aux.insert(&Sha256Hash, &[1u8; 32], 40).unwrap();
        es.init_ops(&es.context(&Sha256Hash), None);
        assert_eq!(es.seed_stage(), SeedStage::MinSeeded);
    }

    #[test]
    fn oversampling_only_when_compliant_and_not_all_seeded() {
        let (plain, _) = manager(&EsdmConfig::default(), None);
        assert_eq!(plain.oversample_extra_bits(), 0);
        assert_eq!(plain.seed_entropy_osr(false), 256);

        let config = EsdmConfig {
            sp80090c_compliant: true,
            ..EsdmConfig::default()
        };
        let (es, _) = manager(&config, None);
        assert_eq!(es.oversample_extra_bits(), 64);
        assert_eq!(es.seed_entropy_osr(false), 384);
        assert_eq!(es.seed_entropy_osr(true), 256);
        es.set_all_sources_fully_seeded(true);
        assert_eq!(es.oversample_extra_bits(), 0);
    }

    #[test]
    fn compliant_mode_needs_oversampled_full_seed() {
        let config = EsdmConfig {
            sp80090c_compliant: true,
            ..EsdmConfig::default()
        };
        let (es, _) = manager(&config, None);
        let ctx = es.context(&Sha256Hash);
        es.init_ops(&ctx, Some(&buf_with(300)));
        assert_eq!(es.seed_stage(), SeedStage::MinSeeded);
        es.init_ops(&ctx, Some(&buf_with(384)));
        assert_eq!(es.seed_stage(), SeedStage::Operational);
    }

    #[test]
    fn security_strength_follows_digest() {
        let aux = Arc::new(AuxPool::new(&Sha512Hash));
        let registry = EsRegistry::new(Vec::new(), Arc::clone(&aux));
        let es = EsManager::new(&EsdmConfig::default(), registry, aux);
        assert_eq!(es.security_strength_bits(), 256);
    }

    #[test]
    fn fill_visits_every_source_aux_last() {
        let (es, aux) = manager(&EsdmConfig::default(), Some(256));
        aux.insert(&Sha256Hash, &[5u8; 32], 128).unwrap();
        let ctx = es.context(&Sha256Hash);
        let mut eb = EntropyBuf::new(es.registry().len());
        es.fill_seed_buffer(&ctx, &mut eb, 256);
        assert_eq!(eb.bits(0), 256);
        assert_eq!(eb.bits(1), 128);
        assert_eq!(aux.entropy(), 0);
    }

    #[test]
    fn fully_seeded_refuses_starved_reseed() {
        let (es, aux) = manager(&EsdmConfig::default(), None);
        let ctx = es.context(&Sha256Hash);
        es.init_ops(&ctx, Some(&buf_with(256)));
        assert!(es.is_fully_seeded());

        aux.insert(&Sha256Hash, &[5u8; 32], 64).unwrap();
        let ctx = es.context(&Sha256Hash);
        let mut eb = EntropyBuf::new(es.registry().len());
        es.fill_seed_buffer(&ctx, &mut eb, 256);
        assert_eq!(eb.total_bits(), 0);
        assert_eq!(aux.entropy(), 64);
    }

    #[test]
    fn reseed_gate_is_exclusive() {
        let (es, _) = manager(&EsdmConfig::default(), None);
        assert!(es.try_lock_reseed());
        assert!(!es.try_lock_reseed());
        es.unlock_reseed();
        assert!(es.try_lock_reseed());
    }

    #[test]
    fn begin_reseed_respects_threshold() {
        let (es, aux) = manager(&EsdmConfig::default(), None);
        aux.insert(&Sha256Hash, &[5u8; 4], 16).unwrap();
        assert!(!es.try_begin_reseed(&es.context(&Sha256Hash)));
        aux.insert(&Sha256Hash, &[5u8; 4], 32).unwrap();
        assert!(es.try_begin_reseed(&es.context(&Sha256Hash)));
        assert!(es.reseed_in_progress());
        es.unlock_reseed();

        es.set_all_sources_fully_seeded(true);
        assert!(!es.try_begin_reseed(&es.context(&Sha256Hash)));
    }

    #[test]
    fn demote_and_reset() {
        let (es, aux) = manager(&EsdmConfig::default(), None);
        es.init_ops(&es.context(&Sha256Hash), Some(&buf_with(256)));
        assert!(es.demote());
        assert!(!es.is_operational() && !es.is_fully_seeded());
        assert!(es.is_min_seeded());
        assert!(!es.demote());

        aux.insert(&Sha256Hash, &[5u8; 32], 100).unwrap();
        es.reset_state();
        assert!(!es.is_min_seeded());
        assert!(!es.all_sources_fully_seeded());
        assert_eq!(aux.entropy(), 0);
    }

    #[test]
    fn nonblocking_sleep_would_block() {
        let (es, _) = manager(&EsdmConfig::default(), None);
        assert_eq!(es.sleep_while_nonoperational(true), Err(EsdmError::WouldBlock));
    }

    #[test]
    fn sleeper_wakes_on_min_seeded() {
        let (es, _) = manager(&EsdmConfig::default(), None);
        let es = Arc::new(es);
        let waiter = {
            let es = Arc::clone(&es);
            thread::spawn(move || es.sleep_while_not_min_seeded())
        };
        thread::sleep(Duration::from_millis(50));
        es.init_ops(&es.context(&Sha256Hash), Some(&buf_with(128)));
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn min_sleeper_wakes_on_direct_full_seed() {
        for _ in 0..500 {
            let (es, _) = manager(&EsdmConfig::default(), None);
            let es = Arc::new(es);
            let (tx, rx) = mpsc::channel();
            {
                let es = Arc::clone(&es);
                thread::spawn(move || {
                    let _ = tx.send(es.sleep_while_not_min_seeded());
                });
            }
            es.init_ops(&es.context(&Sha256Hash), Some(&buf_with(256)));
            assert!(es.is_min_seeded());
            assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(Ok(())));
        }
    }
}
