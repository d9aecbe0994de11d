//! # esdm-core
//!
//! **Entropy Source and DRNG Manager.**
//!
//! `esdm-core` collects entropy from pluggable noise sources into a
//! hash-conditioned auxiliary pool, tracks how well seeded the service is,
//! and serves cryptographic random bytes from a DRNG that it reseeds on a
//! counter, on a timer and on demand.
//!
//! ## Quick Start
//!
//! ```no_run
//! use esdm_core::{Esdm, EsdmConfig};
//!
//! let esdm = Esdm::new(EsdmConfig::default()).unwrap();
//!
//! // Feed the auxiliary pool from anywhere.
//! esdm.pool_insert(b"interrupt timing sample", 0).unwrap();
//!
//! // Blocks until the DRNG is fully seeded.
//! let mut buf = [0u8; 32];
//! esdm.get_random_bytes_full(&mut buf).unwrap();
//! ```
//!
//! ## Architecture
//!
//! Sources → seed buffer (aux pool last) → DRNG seed → DRNG generate → Output
//!
//! Seeding stages:
//! - **Unseeded → InitEntropy** at 32 bits of entropy.
//! - **MinSeeded** at 128 bits. [`Esdm::get_random_bytes_min`] callers wake up.
//! - **FullySeeded / Operational** at the DRNG security strength (256 bits,
//!   plus headroom in SP 800-90C mode). [`Esdm::get_random_bytes_full`]
//!   callers wake up.
//!
//! Every noise source implements the [`EntropySource`] trait. The crypto
//! primitives sit behind the [`Hash`] and [`DrngBackend`] traits; SHA-256,
//! SHA-512 and a SHA-512 Hash_DRBG are built in.

pub mod aux_pool;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod drng_mgr;
pub mod error;
pub mod es;
pub mod es_mgr;
pub mod esdm;

mod sync;

pub use aux_pool::AuxPool;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EsdmConfig;
pub use crypto::{Drng, DrngBackend, Hash, HashDrbg, HashDrbgBackend, HashState, Sha256Hash, Sha512Hash};
pub use drng_mgr::DrngManager;
pub use error::{EsdmError, Result};
pub use es::{EntropyBuf, EntropySource, EsContext, EsRegistry, JitterSource, SystemSource};
pub use es_mgr::{EsManager, SeedStage};
pub use esdm::{Esdm, EsdmBuilder, EsdmStatus, SourceStatus};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
