//! SP 800-90A Hash_DRBG over SHA-512.
//!
//! The instance is allocated unseeded. The first [`Drng::seed`] call
//! instantiates it, every later call reseeds it. No personalization string,
//! no prediction resistance: the manager decides when to reseed.

use sha2::{Digest, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{Drng, DrngBackend};
use crate::error::{EsdmError, Result};

/// seedlen for SHA-512 (SP 800-90A table 2), in bytes.
const SEED_LEN: usize = 111;
const OUT_LEN: usize = 64;
/// Largest generate request, 2^19 bits.
const MAX_REQUEST_BYTES: usize = 1 << 16;
/// Generate calls allowed between two seeds.
const RESEED_INTERVAL: u64 = 1 << 48;
/// SHA-512 supports at most 256 bits of security strength.
const MAX_STRENGTH_BYTES: usize = 32;

/// Hash_DRBG working state.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct HashDrbg {
    v: [u8; SEED_LEN],
    c: [u8; SEED_LEN],
    reseed_counter: u64,
    instantiated: bool,
}

impl HashDrbg {
    /// An unseeded instance. [`Drng::generate`] fails until it is seeded.
    pub fn new() -> Self {
        Self {
            v: [0u8; SEED_LEN],
            c: [0u8; SEED_LEN],
            reseed_counter: 0,
            instantiated: false,
        }
    }

    /// Whether the instance has received seed material.
    pub fn is_instantiated(&self) -> bool {
        self.instantiated
    }

    fn instantiate(&mut self, entropy: &[u8]) {
        hash_df(&[entropy], &mut self.v);
        self.derive_c();
        self.reseed_counter = 1;
        self.instantiated = true;
    }

    fn reseed(&mut self, entropy: &[u8]) {
        let mut old_v = self.v;
        hash_df(&[&[0x01u8][..], &old_v[..], entropy], &mut self.v);
        old_v.zeroize();
        self.derive_c();
        self.reseed_counter = 1;
    }

    fn derive_c(&mut self) {
        let mut v = self.v;
        hash_df(&[&[0x00u8][..], &v[..]], &mut self.c);
        v.zeroize();
    }

    fn hashgen(&self, out: &mut [u8]) {
        let mut data = self.v;
        for chunk in out.chunks_mut(OUT_LEN) {
            let mut block = Sha512::digest(data);
            chunk.copy_from_slice(&block[..chunk.len()]);
            block.as_mut_slice().zeroize();
            add_u64(&mut data, 1);
        }
        data.zeroize();
    }
}

impl Default for HashDrbg {
    fn default() -> Self {
        Self::new()
    }
}

impl Drng for HashDrbg {
    fn seed(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(EsdmError::InvalidArgument("empty seed".to_string()));
        }
        if self.instantiated {
            self.reseed(data);
        } else {
            self.instantiate(data);
        }
        Ok(())
    }

    fn generate(&mut self, out: &mut [u8]) -> Result<usize> {
        if !self.instantiated {
            return Err(EsdmError::Fault("Hash_DRBG used before seeding".to_string()));
        }
        if self.reseed_counter > RESEED_INTERVAL {
            return Err(EsdmError::Fault("Hash_DRBG reseed required".to_string()));
        }
        if out.len() > MAX_REQUEST_BYTES {
            return Err(EsdmError::InvalidArgument(format!(
                "request of {} bytes exceeds {MAX_REQUEST_BYTES}",
                out.len()
            )));
        }

        self.hashgen(out);

        // V = (V + H + C + reseed_counter) mod 2^seedlen, H = Hash(0x03 || V)
        let mut h = Sha512::new_with_prefix([0x03]).chain_update(self.v).finalize();
        let c = self.c;
        add_be(&mut self.v, &h);
        add_be(&mut self.v, &c);
        add_u64(&mut self.v, self.reseed_counter);
        h.as_mut_slice().zeroize();

        self.reseed_counter += 1;
        Ok(out.len())
    }
}

/// Hands out [`HashDrbg`] instances.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashDrbgBackend;

impl DrngBackend for HashDrbgBackend {
    fn name(&self) -> &'static str {
        "hash_drbg_sha512"
    }

    fn alloc(&self, security_strength_bytes: usize) -> Result<Box<dyn Drng>> {
        if security_strength_bytes > MAX_STRENGTH_BYTES {
            return Err(EsdmError::InvalidArgument(format!(
                "Hash_DRBG SHA-512 offers at most {MAX_STRENGTH_BYTES} bytes of security strength"
            )));
        }
        Ok(Box::new(HashDrbg::new()))
    }
}

/// Hash_df (SP 800-90A 10.3.1) over the concatenation of `inputs`.
fn hash_df(inputs: &[&[u8]], out: &mut [u8]) {
    let bits = (out.len() as u32) * 8;
    for (counter, chunk) in (1u8..).zip(out.chunks_mut(OUT_LEN)) {
        let mut h = Sha512::new();
        h.update([counter]);
        h.update(bits.to_be_bytes());
        for input in inputs {
            h.update(input);
        }
        let mut block = h.finalize();
        chunk.copy_from_slice(&block[..chunk.len()]);
        block.as_mut_slice().zeroize();
    }
}

/// Big-endian `v = (v + addend) mod 2^(8 * v.len())`, addend right-aligned.
fn add_be(v: &mut [u8], addend: &[u8]) {
    let addend = &addend[addend.len().saturating_sub(v.len())..];
    let offset = v.len() - addend.len();
    let mut carry = 0u16;
    for i in (0..v.len()).rev() {
        let a = if i >= offset { addend[i - offset] as u16 } else { 0 };
        let sum = v[i] as u16 + a + carry;
        v[i] = sum as u8;
        carry = sum >> 8;
    }
}

fn add_u64(v: &mut [u8], value: u64) {
    add_be(v, &value.to_be_bytes());
}
