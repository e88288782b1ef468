//! Deterministic random environment.
//!
//! RULE: Nothing in the recurrence may call a platform RNG directly.
//! Every transition probability flows through a `ProbabilitySource`,
//! and the default source is a seeded `Pcg64Mcg` stream. A run whose
//! seed is known can be replayed draw for draw.
//!
//! Draw order is part of the contract: one draw per updated cell, cells
//! visited in ascending index. Changing the order changes every result.

use rand::{RngCore, SeedableRng};
use rand_distr::{Beta, Distribution};
use rand_pcg::Pcg64Mcg;

use crate::error::{SimError, SimResult};

/// Seeded uniform stream for the random environment.
pub struct EnvironmentRng {
    seed:  u64,
    inner: Pcg64Mcg,
}

impl EnvironmentRng {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            inner: Pcg64Mcg::seed_from_u64(seed),
        }
    }

    /// Seed from the thread RNG. The chosen seed is logged so the run can
    /// still be reproduced.
    pub fn from_thread_seed() -> Self {
        let seed: u64 = rand::random();
        log::info!("environment rng seeded with {seed}");
        Self::new(seed)
    }

    pub fn seed(&self) -> u64 { self.seed }

    /// Restart the stream from `seed`.
    pub fn reseed(&mut self, seed: u64) {
        *self = Self::new(seed);
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }
}

impl RngCore for EnvironmentRng {
    fn next_u32(&mut self) -> u32 {
        self.inner.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.inner.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.inner.try_fill_bytes(dest)
    }
}

/// A seedable sampler of transition probabilities in [0, 1].
pub trait ProbabilitySource: Send {
    /// Draw the probability for one cell.
    fn sample(&mut self) -> f64;

    /// Restart the underlying stream.
    fn set_seed(&mut self, seed: u64);

    /// The seed the current stream started from.
    fn seed(&self) -> u64;

    fn beta(&self) -> f64;

    fn set_beta(&mut self, beta: f64) -> SimResult<()>;
}

/// How a given beta is sampled.
enum BetaMode {
    /// beta = 0: each cell is fully biased left or right.
    Coin,
    /// beta = 1: Beta(1, 1) is uniform.
    Uniform,
    /// beta = inf: the environment is deterministic.
    Half,
    Symmetric(Beta<f64>),
}

impl BetaMode {
    fn for_beta(beta: f64) -> SimResult<Self> {
        if beta.is_nan() || beta < 0.0 {
            return Err(SimError::precondition(format!(
                "beta must be >= 0 (or +inf), got {beta}"
            )));
        }
        let mode = if beta == 0.0 {
            BetaMode::Coin
        } else if beta == 1.0 {
            BetaMode::Uniform
        } else if beta.is_infinite() {
            BetaMode::Half
        } else {
            let dist = Beta::new(beta, beta).map_err(|e| {
                SimError::precondition(format!("invalid beta {beta}: {e}"))
            })?;
            BetaMode::Symmetric(dist)
        };
        Ok(mode)
    }
}

/// Beta(beta, beta) transition probabilities.
pub struct BetaSource {
    beta: f64,
    mode: BetaMode,
    rng:  EnvironmentRng,
}

impl BetaSource {
    pub fn new(beta: f64, rng: EnvironmentRng) -> SimResult<Self> {
        Ok(Self {
            beta,
            mode: BetaMode::for_beta(beta)?,
            rng,
        })
    }

    pub fn seeded(beta: f64, seed: u64) -> SimResult<Self> {
        Self::new(beta, EnvironmentRng::new(seed))
    }
}

impl ProbabilitySource for BetaSource {
    fn sample(&mut self) -> f64 {
        match &self.mode {
            BetaMode::Coin => self.rng.next_f64().round(),
            BetaMode::Uniform => self.rng.next_f64(),
            BetaMode::Half => 0.5,
            BetaMode::Symmetric(dist) => dist.sample(&mut self.rng),
        }
    }

    fn set_seed(&mut self, seed: u64) {
        self.rng.reseed(seed);
    }

    fn seed(&self) -> u64 {
        self.rng.seed()
    }

    fn beta(&self) -> f64 {
        self.beta
    }

    fn set_beta(&mut self, beta: f64) -> SimResult<()> {
        self.mode = BetaMode::for_beta(beta)?;
        self.beta = beta;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = BetaSource::seeded(0.7, 11).unwrap();
        let mut b = BetaSource::seeded(0.7, 11).unwrap();
        for _ in 0..100 {
            assert_eq!(a.sample().to_bits(), b.sample().to_bits());
        }
    }

    #[test]
    fn reseed_restarts_stream() {
        let mut a = BetaSource::seeded(1.0, 5).unwrap();
        let first: Vec<f64> = (0..10).map(|_| a.sample()).collect();
        a.set_seed(5);
        let again: Vec<f64> = (0..10).map(|_| a.sample()).collect();
        assert_eq!(first, again);
        assert_eq!(a.seed(), 5);
    }

    #[test]
    fn special_betas() {
        let mut coin = BetaSource::seeded(0.0, 1).unwrap();
        for _ in 0..50 {
            let p = coin.sample();
            assert!(p == 0.0 || p == 1.0);
        }
        let mut half = BetaSource::seeded(f64::INFINITY, 1).unwrap();
        assert_eq!(half.sample(), 0.5);
    }

    #[test]
    fn samples_stay_in_unit_interval() {
        let mut src = BetaSource::seeded(2.5, 3).unwrap();
        for _ in 0..1000 {
            let p = src.sample();
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn rejects_invalid_beta() {
        assert!(BetaSource::seeded(-1.0, 0).is_err());
        assert!(BetaSource::seeded(f64::NAN, 0).is_err());
        let mut src = BetaSource::seeded(1.0, 0).unwrap();
        assert!(src.set_beta(-0.5).is_err());
        assert_eq!(src.beta(), 1.0);
    }
}
