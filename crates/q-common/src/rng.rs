// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Random number source abstraction
//!
//! The router core takes entropy from the host through this trait: key
//! generation, trickle interval selection and retransmission jitter. The
//! host wires a DRBG or hardware RNG; tests use a deterministic xorshift.

use crate::errors::{Error, Result};

/// Cryptographically secure random source
pub trait CryptoRng {
    /// Fill `dest` with random bytes
    ///
    /// # Errors
    ///
    /// Returns [`Error::RngFailure`] if the underlying source fails.
    fn fill_bytes(&mut self, dest: &mut [u8]) -> Result<()>;
}

/// Draw a fixed-size random array
///
/// # Errors
///
/// Returns [`Error::RngFailure`] if the underlying source fails.
pub fn random_array<const N: usize, R: CryptoRng>(rng: &mut R) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    rng.fill_bytes(&mut out)?;
    Ok(out)
}

/// Uniform draw in `[0, bound)` (0 when `bound` is 0)
///
/// # Errors
///
/// Returns [`Error::RngFailure`] if the underlying source fails.
pub fn random_below<R: CryptoRng>(rng: &mut R, bound: u64) -> Result<u64> {
    if bound == 0 {
        return Ok(0);
    }
    let raw = random_array::<8, R>(rng)?;
    Ok(u64::from_le_bytes(raw) % bound)
}

/// A broken source, for error-path testing
#[derive(Debug, Default)]
pub struct FailingRng;

impl CryptoRng for FailingRng {
    fn fill_bytes(&mut self, _dest: &mut [u8]) -> Result<()> {
        Err(Error::RngFailure)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Deterministic xorshift64 source for tests
    pub struct XorShiftRng {
        state: u64,
    }

    impl XorShiftRng {
        pub fn new(seed: u64) -> Self {
            Self {
                state: seed.max(1),
            }
        }

        fn next_u64(&mut self) -> u64 {
            self.state ^= self.state << 13;
            self.state ^= self.state >> 7;
            self.state ^= self.state << 17;
            self.state
        }
    }

    impl CryptoRng for XorShiftRng {
        fn fill_bytes(&mut self, dest: &mut [u8]) -> Result<()> {
            for chunk in dest.chunks_mut(8) {
                let bytes = self.next_u64().to_le_bytes();
                chunk.copy_from_slice(&bytes[..chunk.len()]);
            }
            Ok(())
        }
    }

    #[test]
    fn random_below_respects_bound() {
        let mut rng = XorShiftRng::new(42);
        for _ in 0..100 {
            assert!(random_below(&mut rng, 17).unwrap() < 17);
        }
        assert_eq!(random_below(&mut rng, 0).unwrap(), 0);
    }

    #[test]
    fn failing_rng_reports() {
        let mut rng = FailingRng;
        assert_eq!(
            random_array::<4, _>(&mut rng).unwrap_err(),
            Error::RngFailure
        );
    }
}
