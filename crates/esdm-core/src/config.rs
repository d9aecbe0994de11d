//! Service configuration and fixed seeding constants.
//!
//! Every tunable lives in [`EsdmConfig`], which deserializes from JSON with
//! all fields optional. The constants below are part of the seeding contract
//! and are not configurable.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EsdmError, Result};

/// Security strength of the DRNG in bits.
pub const DRNG_SECURITY_STRENGTH_BITS: u32 = 256;
/// Security strength of the DRNG in bytes.
pub const DRNG_SECURITY_STRENGTH_BYTES: usize = (DRNG_SECURITY_STRENGTH_BITS / 8) as usize;
/// Entropy needed before the first (initial) seeding stage is reached.
pub const INIT_ENTROPY_BITS: u32 = 32;
/// Entropy needed to consider the DRNG minimally seeded.
pub const MIN_SEED_ENTROPY_BITS: u32 = 128;
/// Entropy needed to consider the DRNG fully seeded (before oversampling).
pub const FULL_SEED_ENTROPY_BITS: u32 = DRNG_SECURITY_STRENGTH_BITS;
/// Largest digest of any supported conditioning hash, in bytes.
pub const MAX_DIGEST_SIZE: usize = 64;
/// Largest chunk handed to a single DRNG generate call (SP 800-90A bound).
pub const MAX_REQUEST_SIZE: usize = 1 << 12;

/// Default extra bits requested from every source while oversampling.
pub const DEFAULT_OVERSAMPLE_ES_BITS: u32 = 64;
/// Default extra bits added to the full seed requirement while oversampling.
pub const DEFAULT_SEED_BUFFER_INIT_ADD_BITS: u32 = 128;
/// Size of one seed buffer slot in bits: full strength plus initial oversampling.
pub const INIT_SEED_SIZE_BITS: u32 = DRNG_SECURITY_STRENGTH_BITS + DEFAULT_SEED_BUFFER_INIT_ADD_BITS;
/// Size of one seed buffer slot in bytes.
pub const INIT_SEED_SIZE_BYTES: usize = (INIT_SEED_SIZE_BITS / 8) as usize;

/// Default generate calls between two reseeds.
pub const DEFAULT_RESEED_THRESHOLD: u32 = 1 << 20;
/// Default ceiling of generate calls without a full reseed.
pub const DEFAULT_MAX_WITHOUT_RESEED: u32 = 1 << 30;
/// Default maximum time between two reseeds.
pub const DEFAULT_RESEED_MAX_TIME_SECS: u64 = 600;

/// Runtime configuration of an ESDM instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EsdmConfig {
    /// Seconds after which the DRNG is reseeded on its next use. Zero means
    /// a reseed attempt before every generate call.
    pub reseed_max_time_secs: u64,
    /// Generate calls after which the DRNG must be reseeded.
    pub reseed_threshold: u32,
    /// Generate calls without a full reseed after which the service drops
    /// back to non-operational.
    pub max_without_reseed: u32,
    /// Apply SP 800-90C oversampling to seed requests and crediting.
    pub sp80090c_compliant: bool,
    /// Extra bits requested from the sources while oversampling.
    pub oversample_es_bits: u32,
    /// Extra bits added to the full seed requirement while oversampling.
    pub seed_buffer_init_add_bits: u32,
    /// Run entropy-triggered reseeds on a worker thread instead of inline.
    pub deferred_reseed: bool,
}

impl Default for EsdmConfig {
    fn default() -> Self {
        Self {
            reseed_max_time_secs: DEFAULT_RESEED_MAX_TIME_SECS,
            reseed_threshold: DEFAULT_RESEED_THRESHOLD,
            max_without_reseed: DEFAULT_MAX_WITHOUT_RESEED,
            sp80090c_compliant: false,
            oversample_es_bits: DEFAULT_OVERSAMPLE_ES_BITS,
            seed_buffer_init_add_bits: DEFAULT_SEED_BUFFER_INIT_ADD_BITS,
            deferred_reseed: true,
        }
    }
}

impl EsdmConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| EsdmError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EsdmError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Check the cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.reseed_threshold == 0 {
            return Err(EsdmError::Config(
                "reseed_threshold must be at least 1".to_string(),
            ));
        }
        if self.max_without_reseed < self.reseed_threshold {
            return Err(EsdmError::Config(format!(
                "max_without_reseed ({}) must not be below reseed_threshold ({})",
                self.max_without_reseed, self.reseed_threshold
            )));
        }
        if self.oversample_es_bits > (MAX_DIGEST_SIZE * 8) as u32 {
            return Err(EsdmError::Config(format!(
                "oversample_es_bits ({}) exceeds the largest pool digest of {} bits",
                self.oversample_es_bits,
                MAX_DIGEST_SIZE * 8
            )));
        }
        if self.seed_buffer_init_add_bits > DEFAULT_SEED_BUFFER_INIT_ADD_BITS {
            return Err(EsdmError::Config(format!(
                "seed_buffer_init_add_bits exceeds the seed slot headroom of {DEFAULT_SEED_BUFFER_INIT_ADD_BITS} bits"
            )));
        }
        Ok(())
    }

    /// Maximum reseed interval as a [`Duration`].
    pub fn reseed_max_time(&self) -> Duration {
        Duration::from_secs(self.reseed_max_time_secs)
    }
}
