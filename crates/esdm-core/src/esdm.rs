//! The ESDM service object.
//!
//! [`Esdm`] ties the auxiliary pool, the entropy source manager and the DRNG
//! manager together. It is a cheap, cloneable handle; all clones share one
//! service. Producers feed it through [`Esdm::pool_insert`], consumers read
//! through [`Esdm::get_random_bytes_full`] or [`Esdm::get_random_bytes_min`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use serde::Serialize;
use zeroize::Zeroizing;

use crate::aux_pool::AuxPool;
use crate::clock::{Clock, SystemClock};
use crate::config::{EsdmConfig, INIT_ENTROPY_BITS, MAX_DIGEST_SIZE, MAX_REQUEST_SIZE};
use crate::crypto::{DrngBackend, Hash, HashDrbgBackend, Sha256Hash};
use crate::drng_mgr::DrngManager;
use crate::error::{EsdmError, Result};
use crate::es::{EntropyBuf, EntropySource, EsRegistry, JitterSource, SystemSource};
use crate::es_mgr::{EsManager, SeedStage};

/// Per-source entry of [`EsdmStatus`].
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub name: &'static str,
    /// Entropy the source could deliver for a full seed request right now.
    pub current_entropy: u32,
    pub max_entropy: u32,
    pub description: String,
}

/// Snapshot of the service state.
#[derive(Debug, Clone, Serialize)]
pub struct EsdmStatus {
    pub version: &'static str,
    pub seed_stage: SeedStage,
    /// The DRNG has been allocated.
    pub available: bool,
    pub operational: bool,
    pub fully_seeded: bool,
    pub min_seeded: bool,
    pub all_sources_fully_seeded: bool,
    pub drng_fully_seeded: bool,
    pub force_reseed: bool,
    pub hash: &'static str,
    pub drng: &'static str,
    pub security_strength_bits: u32,
    pub entropy_threshold_bits: u32,
    pub available_entropy_bits: u32,
    pub aux_entropy_bits: u32,
    pub write_wakeup_bits: u32,
    pub sp80090c_compliant: bool,
    pub oversample_extra_bits: u32,
    pub requests_since_fully_seeded: u32,
    pub secs_since_last_seeded: u64,
    /// Successful DRNG seed operations.
    pub seed_operations: u64,
    /// Seed buffer fills handed to the DRNG.
    pub reseeds_performed: u64,
    /// Due reseeds postponed because another reseed held the gate.
    pub reseeds_skipped: u64,
    pub sources: Vec<SourceStatus>,
}

struct Inner {
    config: EsdmConfig,
    aux: Arc<AuxPool>,
    es: EsManager,
    drng: DrngManager,
    reseeds: AtomicU64,
    skipped: AtomicU64,
}

/// Handle to one ESDM service instance.
#[derive(Clone)]
pub struct Esdm {
    inner: Arc<Inner>,
}

/// Configures and constructs an [`Esdm`].
pub struct EsdmBuilder {
    config: EsdmConfig,
    hash: Arc<dyn Hash>,
    backend: Box<dyn DrngBackend>,
    sources: Vec<Arc<dyn EntropySource>>,
    clock: Arc<dyn Clock>,
}

impl Default for EsdmBuilder {
    fn default() -> Self {
        Self {
            config: EsdmConfig::default(),
            hash: Arc::new(Sha256Hash),
            backend: Box::new(HashDrbgBackend),
            sources: Vec::new(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl EsdmBuilder {
    pub fn config(mut self, config: EsdmConfig) -> Self {
        self.config = config;
        self
    }

    /// Conditioning hash of the auxiliary pool. SHA-256 by default.
    pub fn hash(mut self, hash: Arc<dyn Hash>) -> Self {
        self.hash = hash;
        self
    }

    /// DRNG implementation. SHA-512 Hash_DRBG by default.
    pub fn backend(mut self, backend: impl DrngBackend + 'static) -> Self {
        self.backend = Box::new(backend);
        self
    }

    /// Register a fast noise source. Sources are polled in registration
    /// order; the auxiliary pool always comes last.
    pub fn source(mut self, source: Arc<dyn EntropySource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Register the timing-jitter and OS RNG sources.
    pub fn default_sources(self) -> Self {
        self.source(Arc::new(JitterSource::default()))
            .source(Arc::new(SystemSource::default()))
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate the configuration and assemble the service.
    ///
    /// The auxiliary pool absorbs a boot seed without entropy credit. The
    /// DRNG is not allocated until [`Esdm::initialize`].
    pub fn build(self) -> Result<Esdm> {
        self.config.validate()?;
        check_digest_size(self.hash.as_ref())?;

        let aux = Arc::new(AuxPool::new(self.hash.as_ref()));
        let registry = EsRegistry::new(self.sources, Arc::clone(&aux));
        let es = EsManager::new(&self.config, registry, Arc::clone(&aux));
        aux.insert(self.hash.as_ref(), &boot_seed(), 0)?;
        let drng = DrngManager::new(&self.config, self.backend, self.hash, self.clock);

        debug!("ESDM sources: {:?}", es.registry().names());
        Ok(Esdm {
            inner: Arc::new(Inner {
                config: self.config,
                aux,
                es,
                drng,
                reseeds: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
            }),
        })
    }
}

fn check_digest_size(hash: &dyn Hash) -> Result<()> {
    let size = hash.digest_size();
    if size == 0 || size > MAX_DIGEST_SIZE {
        return Err(EsdmError::InvalidArgument(format!(
            "hash {} has a {size} byte digest, supported are 1..={MAX_DIGEST_SIZE}",
            hash.name()
        )));
    }
    Ok(())
}

/// Wall-clock time, OS RNG words, process id and host name.
fn boot_seed() -> Zeroizing<Vec<u8>> {
    let mut seed = Zeroizing::new(Vec::with_capacity(128));
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    seed.extend_from_slice(&now.to_le_bytes());

    let mut words = [0u8; MAX_DIGEST_SIZE];
    if let Err(e) = getrandom::fill(&mut words) {
        warn!("boot seed without OS RNG words: {e}");
    }
    seed.extend_from_slice(&words);
    zeroize::Zeroize::zeroize(&mut words);

    seed.extend_from_slice(&std::process::id().to_le_bytes());
    if let Ok(host) = std::fs::read_to_string("/proc/sys/kernel/hostname") {
        seed.extend_from_slice(host.trim().as_bytes());
    }
    seed
}

impl Esdm {
    pub fn builder() -> EsdmBuilder {
        EsdmBuilder::default()
    }

    /// Service with the default hash, DRNG and noise sources.
    pub fn new(config: EsdmConfig) -> Result<Self> {
        Self::builder().config(config).default_sources().build()
    }

    pub fn config(&self) -> &EsdmConfig {
        &self.inner.config
    }

    /// The auxiliary pool, for inspection.
    pub fn aux_pool(&self) -> &AuxPool {
        &self.inner.aux
    }

    pub fn es_manager(&self) -> &EsManager {
        &self.inner.es
    }

    pub fn drng_manager(&self) -> &DrngManager {
        &self.inner.drng
    }

    /// Mix `data` into the auxiliary pool, credited with at most
    /// `entropy_bits`, and reseed if enough entropy is now available.
    pub fn pool_insert(&self, data: &[u8], entropy_bits: u32) -> Result<()> {
        let ret = {
            let hash = self.inner.drng.hash_read();
            self.inner.aux.insert(hash.as_ref(), data, entropy_bits)
        };
        self.notify_entropy_added();
        ret
    }

    /// Start a reseed if the sources hold enough entropy and no reseed runs.
    ///
    /// Stops having any effect once every source reported full seeding.
    pub fn notify_entropy_added(&self) {
        let begin = {
            let hash = self.inner.drng.hash_read();
            let ctx = self.inner.es.context(hash.as_ref());
            self.inner.es.try_begin_reseed(&ctx)
        };
        if begin {
            self.dispatch_seed_work();
        }
    }

    fn dispatch_seed_work(&self) {
        if !self.inner.config.deferred_reseed {
            self.seed_work();
            return;
        }
        let worker = self.clone();
        let spawned = thread::Builder::new()
            .name("esdm-seed".to_string())
            .spawn(move || worker.seed_work());
        if let Err(e) = spawned {
            warn!("cannot start reseed worker, seeding inline: {e}");
            self.seed_work();
        }
    }

    /// Reseed work item. The caller owns the reseed gate; it is released here.
    fn seed_work(&self) {
        if self.inner.drng.is_fully_seeded() {
            self.inner.es.set_all_sources_fully_seeded(true);
        } else {
            debug!("reseed triggered by system events");
            self.seed();
        }
        self.inner.es.unlock_reseed();
    }

    fn seed(&self) {
        if self.inner.drng.is_available() {
            self.seed_es();
        } else {
            let hash = self.inner.drng.hash_read();
            let ctx = self.inner.es.context(hash.as_ref());
            self.inner.es.init_ops(&ctx, None);
        }
    }

    fn seed_es(&self) {
        let inner = &*self.inner;
        let hash = inner.drng.hash_read();
        let ctx = inner.es.context(hash.as_ref());
        let drng_fully_seeded = inner.drng.is_fully_seeded();

        let mut eb = EntropyBuf::new(inner.es.registry().len());
        inner.es.fill_seed_buffer(
            &ctx,
            &mut eb,
            inner.es.seed_entropy_osr(drng_fully_seeded),
        );
        let fully_seeded = inner.es.fully_seeded_eb(drng_fully_seeded, &eb);
        inner.drng.inject(&eb.to_bytes(), fully_seeded, "regular");
        inner.es.init_ops(&ctx, Some(&eb));
        inner.reseeds.fetch_add(1, Ordering::Relaxed);
    }

    /// Reseed now unless another reseed holds the gate.
    ///
    /// Returns whether this call performed the reseed.
    pub fn reseed(&self) -> bool {
        if !self.inner.es.try_lock_reseed() {
            return false;
        }
        self.seed();
        self.inner.es.unlock_reseed();
        true
    }

    /// Allocate the DRNG and attempt its first seeding. Idempotent.
    pub fn initialize(&self) -> Result<()> {
        if !self.inner.drng.alloc()? {
            return Ok(());
        }
        if self.inner.es.try_lock_reseed() {
            info!("Initial DRNG initialized triggering first seeding");
            self.seed_work();
        } else {
            info!("Initial DRNG initialized without seeding");
        }
        Ok(())
    }

    /// Fill `out` from the DRNG, reseeding first when due.
    ///
    /// Never waits for a reseed: if another one is in progress the reseed is
    /// postponed to the next request. Returns the number of bytes written.
    pub fn get(&self, out: &mut [u8]) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let inner = &*self.inner;
        if !inner.drng.is_available() {
            return Err(EsdmError::Unavailable);
        }

        let len = out.len().min(i32::MAX as usize);
        if inner.drng.exceeds_max_without_reseed() {
            self.unset_fully_seeded();
        }

        let mut processed = 0;
        while processed < len {
            let todo = (len - processed).min(MAX_REQUEST_SIZE);

            if inner.drng.must_reseed() {
                if inner.es.try_lock_reseed() {
                    self.seed();
                    inner.es.unlock_reseed();
                } else {
                    inner.drng.set_force_reseed();
                    inner.skipped.fetch_add(1, Ordering::Relaxed);
                }
            }

            processed += inner.drng.generate(&mut out[processed..processed + todo])?;
        }
        Ok(processed)
    }

    /// Take the DRNG out of the fully seeded state. If the service was
    /// operational it drops back and a reseed is attempted right away.
    pub fn unset_fully_seeded(&self) {
        self.inner.drng.unset_fully_seeded();
        if self.inner.es.demote() {
            self.notify_entropy_added();
        }
    }

    /// Reseed before the next generate. Only honored once fully seeded.
    pub fn force_reseed(&self) {
        self.inner.drng.force_reseed();
    }

    /// Drop all entropy credit and seeding state. Pool contents are kept.
    pub fn reset(&self) {
        self.inner.drng.reset();
        self.inner.es.set_entropy_thresh(INIT_ENTROPY_BITS);
        self.inner.es.reset_state();
    }

    /// Overwrite the entropy credit of the auxiliary pool.
    pub fn set_entropy(&self, bits: u32) {
        self.inner.aux.set_entropy(bits);
    }

    /// Replace the conditioning hash of the auxiliary pool.
    ///
    /// Fails with [`EsdmError::Unsupported`] when hash switching is not
    /// compiled in.
    pub fn switch_hash(&self, new_hash: Arc<dyn Hash>) -> Result<()> {
        check_digest_size(new_hash.as_ref())?;
        let mut hash = self.inner.drng.hash_write();
        let ctx = self.inner.es.context(hash.as_ref());
        for es in self.inner.es.registry().iter() {
            es.switch_hash(&ctx, new_hash.as_ref())?;
        }
        info!("conditioning hash switched from {} to {}", hash.name(), new_hash.name());
        *hash = new_hash;
        Ok(())
    }

    pub fn sleep_while_nonoperational(&self, nonblock: bool) -> Result<()> {
        self.inner.es.sleep_while_nonoperational(nonblock)
    }

    pub fn sleep_while_not_min_seeded(&self) -> Result<()> {
        self.inner.es.sleep_while_not_min_seeded()
    }

    /// Fill `buf` once the service is fully operational. Blocks until then.
    pub fn get_random_bytes_full(&self, buf: &mut [u8]) -> Result<usize> {
        self.initialize()?;
        self.sleep_while_nonoperational(false)?;
        self.get(buf)
    }

    /// Fill `buf` once the service is at least minimally seeded.
    pub fn get_random_bytes_min(&self, buf: &mut [u8]) -> Result<usize> {
        self.initialize()?;
        self.sleep_while_not_min_seeded()?;
        self.get(buf)
    }

    pub fn status(&self) -> EsdmStatus {
        let inner = &*self.inner;
        let hash = inner.drng.hash_read();
        let ctx = inner.es.context(hash.as_ref());
        let full_request = inner.es.seed_entropy_osr(false);

        let sources = inner
            .es
            .registry()
            .iter()
            .map(|es| SourceStatus {
                name: es.name(),
                current_entropy: es.current_entropy(&ctx, full_request),
                max_entropy: es.max_entropy(&ctx),
                description: es.describe(&ctx),
            })
            .collect();

        EsdmStatus {
            version: crate::VERSION,
            seed_stage: inner.es.seed_stage(),
            available: inner.drng.is_available(),
            operational: inner.es.is_operational(),
            fully_seeded: inner.es.is_fully_seeded(),
            min_seeded: inner.es.is_min_seeded(),
            all_sources_fully_seeded: inner.es.all_sources_fully_seeded(),
            drng_fully_seeded: inner.drng.is_fully_seeded(),
            force_reseed: inner.drng.is_force_reseed(),
            hash: hash.name(),
            drng: inner.drng.backend_name(),
            security_strength_bits: inner.es.security_strength_bits(),
            entropy_threshold_bits: inner.es.entropy_thresh(),
            available_entropy_bits: inner.es.available_entropy(&ctx),
            aux_entropy_bits: inner.aux.entropy(),
            write_wakeup_bits: inner.aux.write_wakeup_bits(),
            sp80090c_compliant: inner.es.sp80090c_compliant(),
            oversample_extra_bits: ctx.oversample_bits,
            requests_since_fully_seeded: inner.drng.requests_since_fully_seeded(),
            secs_since_last_seeded: inner.drng.since_last_seeded().as_secs(),
            seed_operations: inner.drng.seed_count(),
            reseeds_performed: inner.reseeds.load(Ordering::Relaxed),
            reseeds_skipped: inner.skipped.load(Ordering::Relaxed),
            sources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Sha512Hash;

    fn inline_config() -> EsdmConfig {
        EsdmConfig {
            deferred_reseed: false,
            ..EsdmConfig::default()
        }
    }

    fn aux_only() -> Esdm {
        Esdm::builder().config(inline_config()).build().unwrap()
    }

    #[test]
    fn boot_seed_is_uncredited() {
        let esdm = aux_only();
        assert!(esdm.aux_pool().is_initialized());
        assert_eq!(esdm.aux_pool().entropy(), 0);
        assert_eq!(esdm.es_manager().registry().names(), vec!["auxiliary"]);
    }

    #[test]
    fn get_before_initialize_is_unavailable() {
        let esdm = aux_only();
        let mut buf = [0u8; 16];
        assert_eq!(esdm.get(&mut buf), Err(EsdmError::Unavailable));
        assert_eq!(esdm.get(&mut []), Ok(0));
    }

    #[test]
    fn initialize_is_idempotent() {
        let esdm = aux_only();
        esdm.initialize().unwrap();
        esdm.initialize().unwrap();
        assert!(esdm.status().available);
        assert_eq!(esdm.status().reseeds_performed, 1);
    }

    #[test]
    fn rejects_oversized_digest() {
        struct Huge;
        impl Hash for Huge {
            fn name(&self) -> &'static str {
                "huge"
            }
            fn digest_size(&self) -> usize {
                128
            }
            fn init(&self) -> Result<Box<dyn crate::crypto::HashState>> {
                Sha512Hash.init()
            }
        }
        let err = Esdm::builder().hash(Arc::new(Huge)).build().err();
        assert!(matches!(err, Some(EsdmError::InvalidArgument(_))));
    }

    #[test]
    fn invalid_config_rejected() {
        let config = EsdmConfig {
            reseed_threshold: 0,
            ..EsdmConfig::default()
        };
        assert!(matches!(
            Esdm::builder().config(config).build().err(),
            Some(EsdmError::Config(_))
        ));
    }

    #[test]
    fn insert_then_get_serves_output() {
        let esdm = aux_only();
        esdm.initialize().unwrap();
        esdm.pool_insert(&[0x11; 32], 256).unwrap();
        assert!(esdm.status().operational);

        let mut a = [0u8; 64];
        let mut b = [0u8; 64];
        assert_eq!(esdm.get_random_bytes_full(&mut a).unwrap(), 64);
        assert_eq!(esdm.get_random_bytes_full(&mut b).unwrap(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn reset_drops_to_unseeded() {
        let esdm = aux_only();
        esdm.initialize().unwrap();
        esdm.pool_insert(&[0x22; 32], 256).unwrap();
        esdm.reset();
        let status = esdm.status();
        assert_eq!(status.seed_stage, SeedStage::Unseeded);
        assert!(!status.drng_fully_seeded);
        assert!(status.force_reseed);
        assert_eq!(status.aux_entropy_bits, 0);
        assert_eq!(status.entropy_threshold_bits, INIT_ENTROPY_BITS);
    }

    #[test]
    fn force_reseed_after_full_seed() {
        let esdm = aux_only();
        esdm.initialize().unwrap();
        esdm.pool_insert(&[0x33; 32], 256).unwrap();
        assert!(!esdm.status().force_reseed);
        esdm.force_reseed();
        assert!(esdm.status().force_reseed);
    }

    #[test]
    fn set_entropy_is_capped() {
        let esdm = aux_only();
        esdm.set_entropy(10_000);
        assert_eq!(esdm.aux_pool().entropy(), 256);
    }

    #[cfg(feature = "crypto-switch")]
    #[test]
    fn switch_hash_updates_status() {
        let esdm = aux_only();
        esdm.switch_hash(Arc::new(Sha512Hash)).unwrap();
        let status = esdm.status();
        assert_eq!(status.hash, "sha512");
        assert_eq!(esdm.aux_pool().digest_bits(), 512);
        assert_eq!(status.security_strength_bits, 256);
    }

    #[test]
    fn status_lists_sources_in_order() {
        let esdm = Esdm::new(inline_config()).unwrap();
        let names: Vec<_> = esdm.status().sources.iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["jitter", "system", "auxiliary"]);
    }

    #[test]
    fn source_descriptions_are_single_trimmed_lines() {
        let esdm = Esdm::new(inline_config()).unwrap();
        for src in esdm.status().sources {
            assert!(!src.description.is_empty(), "{} has no description", src.name);
            assert_eq!(src.description.trim(), src.description);
            assert!(!src.description.contains('\n'), "{} spans lines", src.name);
        }
    }

    #[test]
    fn default_sources_reach_operational_on_initialize() {
        let esdm = Esdm::new(inline_config()).unwrap();
        esdm.initialize().unwrap();
        let status = esdm.status();
        assert!(status.operational);
        assert!(status.drng_fully_seeded);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["seed_stage"], "operational");
    }
}
