//! DRNG manager: owns the DRNG instance and decides when it needs a reseed.
//!
//! A reseed is due when the request counter runs down, when one was forced,
//! or when the maximum reseed interval elapsed. Seeding failures never stop
//! output; they only arm a forced reseed for the next request.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::clock::Clock;
use crate::config::{DRNG_SECURITY_STRENGTH_BYTES, EsdmConfig};
use crate::crypto::{Drng, DrngBackend, Hash};
use crate::error::{EsdmError, Result};
use crate::sync::{lock, read, write};

/// The DRNG instance and its reseed bookkeeping.
pub struct DrngManager {
    backend: Box<dyn DrngBackend>,
    /// Serializes seed and generate. `None` until allocated.
    drng: Mutex<Option<Box<dyn Drng>>>,
    /// Conditioning hash of the aux pool. Write-locked only to switch it.
    hash: RwLock<Arc<dyn Hash>>,
    available: AtomicBool,

    /// Counts down to the next reseed.
    requests: AtomicI64,
    requests_since_fully_seeded: AtomicU32,
    last_seeded: Mutex<Instant>,
    fully_seeded: AtomicBool,
    force_reseed: AtomicBool,
    seeds: AtomicU64,

    reseed_threshold: u32,
    max_without_reseed: u32,
    reseed_max_time: Duration,
    clock: Arc<dyn Clock>,
}

impl DrngManager {
    pub fn new(
        config: &EsdmConfig,
        backend: Box<dyn DrngBackend>,
        hash: Arc<dyn Hash>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        Self {
            backend,
            drng: Mutex::new(None),
            hash: RwLock::new(hash),
            available: AtomicBool::new(false),
            requests: AtomicI64::new(i64::from(config.reseed_threshold)),
            requests_since_fully_seeded: AtomicU32::new(0),
            last_seeded: Mutex::new(now),
            fully_seeded: AtomicBool::new(false),
            force_reseed: AtomicBool::new(true),
            seeds: AtomicU64::new(0),
            reseed_threshold: config.reseed_threshold,
            max_without_reseed: config.max_without_reseed,
            reseed_max_time: config.reseed_max_time(),
            clock,
        }
    }

    /// Whether the DRNG has been allocated.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Allocate the DRNG if that has not happened yet.
    ///
    /// Returns `true` if this call performed the allocation.
    pub fn alloc(&self) -> Result<bool> {
        if self.is_available() {
            return Ok(false);
        }
        let mut drng = lock(&self.drng);
        if self.is_available() {
            return Ok(false);
        }
        *drng = Some(self.backend.alloc(DRNG_SECURITY_STRENGTH_BYTES)?);
        self.reset_counters();
        drop(drng);

        self.available.store(true, Ordering::Release);
        debug!("ESDM for general use is available");
        Ok(true)
    }

    /// Re-arm the reseed counters and drop the fully seeded flag.
    pub fn reset(&self) {
        let _drng = lock(&self.drng);
        self.reset_counters();
    }

    fn reset_counters(&self) {
        self.requests
            .store(i64::from(self.reseed_threshold), Ordering::Relaxed);
        self.requests_since_fully_seeded.store(0, Ordering::Relaxed);
        *lock(&self.last_seeded) = self.clock.now();
        self.fully_seeded.store(false, Ordering::Release);
        self.force_reseed.store(true, Ordering::Release);
        debug!("reset DRNG");
    }

    /// Seed the DRNG with `data`. `label` names the seeding in log output.
    ///
    /// A failing seed only arms a forced reseed.
    pub fn inject(&self, data: &[u8], fully_seeded: bool, label: &str) {
        let mut guard = lock(&self.drng);
        debug!("seeding {label} DRNG with {} bytes", data.len());

        let seeded = match guard.as_mut() {
            Some(drng) => drng.seed(data),
            None => Err(EsdmError::Unavailable),
        };
        if let Err(e) = seeded {
            warn!("seeding of {label} DRNG failed: {e}");
            self.force_reseed.store(true, Ordering::Release);
            return;
        }

        let remaining = self.requests.load(Ordering::Relaxed);
        let gc = (i64::from(self.reseed_threshold) - remaining).clamp(0, i64::from(u32::MAX)) as u32;
        let now = self.clock.now();
        let mut last = lock(&self.last_seeded);
        debug!(
            "{label} DRNG stats since last seeding: {} secs; generate calls: {gc}",
            now.saturating_duration_since(*last).as_secs()
        );

        if fully_seeded {
            self.requests_since_fully_seeded.store(0, Ordering::Relaxed);
        } else {
            let _ = self.requests_since_fully_seeded.fetch_update(
                Ordering::Relaxed,
                Ordering::Relaxed,
                |n| Some(n.saturating_add(gc)),
            );
        }

        *last = now;
        self.requests
            .store(i64::from(self.reseed_threshold), Ordering::Relaxed);
        self.force_reseed.store(false, Ordering::Release);
        self.seeds.fetch_add(1, Ordering::Relaxed);

        if fully_seeded && !self.fully_seeded.swap(true, Ordering::AcqRel) {
            debug!("{label} DRNG fully seeded");
        }
    }

    /// Count one generate request and report whether a reseed is due.
    pub fn must_reseed(&self) -> bool {
        let counted_out = self.requests.fetch_sub(1, Ordering::AcqRel) == 1;
        counted_out || self.force_reseed.load(Ordering::Acquire) || self.reseed_interval_elapsed()
    }

    fn reseed_interval_elapsed(&self) -> bool {
        if self.reseed_max_time.is_zero() {
            return true;
        }
        let last = *lock(&self.last_seeded);
        self.clock.now().saturating_duration_since(last) > self.reseed_max_time
    }

    /// Demand a reseed before the next generate, if the DRNG was fully seeded.
    pub fn force_reseed(&self) {
        let fully = self.is_fully_seeded();
        self.force_reseed.store(fully, Ordering::Release);
        debug!("force reseed of initial DRNG");
    }

    /// Unconditionally demand a reseed before the next generate.
    pub fn set_force_reseed(&self) {
        self.force_reseed.store(true, Ordering::Release);
    }

    pub fn is_force_reseed(&self) -> bool {
        self.force_reseed.load(Ordering::Acquire)
    }

    pub fn is_fully_seeded(&self) -> bool {
        self.fully_seeded.load(Ordering::Acquire)
    }

    pub fn unset_fully_seeded(&self) {
        self.fully_seeded.store(false, Ordering::Release);
    }

    pub fn requests_since_fully_seeded(&self) -> u32 {
        self.requests_since_fully_seeded.load(Ordering::Relaxed)
    }

    /// Whether the DRNG ran past the ceiling of requests without a full seed.
    pub fn exceeds_max_without_reseed(&self) -> bool {
        self.requests_since_fully_seeded() > self.max_without_reseed
    }

    /// Requests left before the counter demands a reseed.
    pub fn requests_until_reseed(&self) -> i64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Successful seed operations since creation.
    pub fn seed_count(&self) -> u64 {
        self.seeds.load(Ordering::Relaxed)
    }

    /// Time since the last successful seed.
    pub fn since_last_seeded(&self) -> Duration {
        let last = *lock(&self.last_seeded);
        self.clock.now().saturating_duration_since(last)
    }

    /// Fill `out` in one DRNG call. A failed or empty generate is a fault.
    pub fn generate(&self, out: &mut [u8]) -> Result<usize> {
        let mut guard = lock(&self.drng);
        let drng = guard.as_mut().ok_or(EsdmError::Unavailable)?;
        match drng.generate(out) {
            Ok(0) => {
                warn!("getting random data from DRNG failed (no output)");
                Err(EsdmError::Fault("DRNG returned no data".to_string()))
            }
            Ok(n) => Ok(n.min(out.len())),
            Err(e) => {
                warn!("getting random data from DRNG failed ({e})");
                Err(EsdmError::Fault(e.to_string()))
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Shared access to the conditioning hash.
    pub fn hash_read(&self) -> RwLockReadGuard<'_, Arc<dyn Hash>> {
        read(&self.hash)
    }

    /// Exclusive access to the conditioning hash, for switching it.
    pub fn hash_write(&self) -> RwLockWriteGuard<'_, Arc<dyn Hash>> {
        write(&self.hash)
    }
}
