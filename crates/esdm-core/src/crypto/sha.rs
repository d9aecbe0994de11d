//! SHA-2 conditioning hashes.

use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroize;

use super::{Hash, HashState};
use crate::error::{EsdmError, Result};

struct DigestState<D>(D);

impl<D> HashState for DigestState<D>
where
    D: Digest + Send + 'static,
{
    fn update(&mut self, data: &[u8]) -> Result<()> {
        Digest::update(&mut self.0, data);
        Ok(())
    }

    fn finalize(self: Box<Self>, out: &mut [u8]) -> Result<usize> {
        let DigestState(inner) = *self;
        let mut digest = inner.finalize();
        let len = digest.len();
        if out.len() < len {
            digest.as_mut_slice().zeroize();
            return Err(EsdmError::InvalidArgument(format!(
                "digest buffer of {} bytes is smaller than {len}",
                out.len()
            )));
        }
        out[..len].copy_from_slice(&digest);
        digest.as_mut_slice().zeroize();
        Ok(len)
    }
}

/// SHA-256, the boot-time default conditioning hash.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Hash;

impl Hash for Sha256Hash {
    fn name(&self) -> &'static str {
        "sha256"
    }

    fn digest_size(&self) -> usize {
        32
    }

    fn init(&self) -> Result<Box<dyn HashState>> {
        Ok(Box::new(DigestState(Sha256::new())))
    }
}

/// SHA-512.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha512Hash;

impl Hash for Sha512Hash {
    fn name(&self) -> &'static str {
        "sha512"
    }

    fn digest_size(&self) -> usize {
        64
    }

    fn init(&self) -> Result<Box<dyn HashState>> {
        Ok(Box::new(DigestState(Sha512::new())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(hash: &dyn Hash, data: &[u8]) -> Vec<u8> {
        let mut state = hash.init().unwrap();
        state.update(data).unwrap();
        let mut out = [0u8; 64];
        let n = state.finalize(&mut out).unwrap();
        out[..n].to_vec()
    }

    #[test]
    fn sha256_known_answer() {
        let d = run(&Sha256Hash, b"abc");
        assert_eq!(d.len(), 32);
        assert_eq!(&d[..4], &[0xba, 0x78, 0x16, 0xbf]);
    }

    #[test]
    fn sha512_known_answer() {
        let d = run(&Sha512Hash, b"abc");
        assert_eq!(d.len(), 64);
        assert_eq!(&d[..4], &[0xdd, 0xaf, 0x35, 0xa1]);
    }

    #[test]
    fn digest_size_matches_output() {
        assert_eq!(run(&Sha256Hash, b"").len(), Sha256Hash.digest_size());
        assert_eq!(run(&Sha512Hash, b"").len(), Sha512Hash.digest_size());
    }

    #[test]
    fn short_output_buffer_rejected() {
        let state = Sha512Hash.init().unwrap();
        let mut out = [0u8; 32];
        assert!(matches!(
            state.finalize(&mut out),
            Err(EsdmError::InvalidArgument(_))
        ));
    }
}
