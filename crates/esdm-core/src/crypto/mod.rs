//! Crypto backend interfaces.
//!
//! The core never hashes or expands seed material itself. It calls through
//! two small capability traits:
//!
//! - [`Hash`] conditions the auxiliary pool. It must be usable from the very
//!   first insert, so creating a [`HashState`] is the only allocation it does.
//! - [`DrngBackend`] allocates the [`Drng`] that serves output. It is
//!   instantiated once, behind the DRNG lock, and may allocate freely.
//!
//! Dropping a state or a DRNG releases it; implementations zeroize their
//! secrets on drop.

mod hash_drbg;
mod sha;

pub use hash_drbg::{HashDrbg, HashDrbgBackend};
pub use sha::{Sha256Hash, Sha512Hash};

use crate::error::Result;

/// Running state of one hash computation.
pub trait HashState: Send {
    /// Absorb `data`.
    fn update(&mut self, data: &[u8]) -> Result<()>;

    /// Finish the computation and write the digest to the front of `out`.
    /// Returns the digest length.
    fn finalize(self: Box<Self>, out: &mut [u8]) -> Result<usize>;
}

/// Conditioning hash used by the auxiliary pool.
pub trait Hash: Send + Sync {
    /// Algorithm name for status output.
    fn name(&self) -> &'static str;

    /// Digest size in bytes. Never larger than [`crate::config::MAX_DIGEST_SIZE`].
    fn digest_size(&self) -> usize;

    /// Start a fresh, empty computation.
    fn init(&self) -> Result<Box<dyn HashState>>;
}

/// A deterministic random bit generator instance.
pub trait Drng: Send {
    /// Seed (first call) or reseed (later calls) with `data`.
    fn seed(&mut self, data: &[u8]) -> Result<()>;

    /// Fill `out` and return the number of bytes written.
    fn generate(&mut self, out: &mut [u8]) -> Result<usize>;
}

/// Allocator for a [`Drng`] implementation.
pub trait DrngBackend: Send + Sync {
    /// Algorithm name for status output.
    fn name(&self) -> &'static str;

    /// Allocate an unseeded instance providing `security_strength_bytes`.
    fn alloc(&self, security_strength_bytes: usize) -> Result<Box<dyn Drng>>;
}
