//! The recurrence engine: owns the triangular state and advances it.
//!
//! The stored array is `Z(n, t) = P(X_t >= 2n - t)`, the probability that a
//! walker in the current environment sits at or right of `x = 2n - t`.
//!
//! RECURRENCE (one step, t -> t+1):
//!   Z(0, t+1) = 1
//!   Z(n, t+1) = B(n) * Z(n-1, t) + (1 - B(n)) * Z(n, t),   1 <= n <= t+1
//! with a fresh transition probability B(n) per cell and Z(t+1, t) = 0.
//!
//! RULES:
//!   - `cdf.len() == t_max + 1`, always. Allocated once.
//!   - Entries above `time` are zero.
//!   - No write happens unless `time < t_max` has been checked first.
//!   - Draws happen in ascending `n`, exactly `time + 1` per step.

use crate::{
    error::{SimError, SimResult},
    numeric::Quad,
    rng::{BetaSource, EnvironmentRng, ProbabilitySource},
    types::{Position, Time},
};

pub struct CdfEngine {
    time:   Time,
    t_max:  Time,
    cdf:    Vec<Quad>,
    source: Box<dyn ProbabilitySource>,
    /// Per-step scratch for the cell draws; reused so a step never allocates.
    draws:  Vec<f64>,
}

impl CdfEngine {
    /// Fresh state at `time = 0` with a Beta(beta, beta) environment.
    pub fn new(beta: f64, t_max: Time, rng: EnvironmentRng) -> SimResult<Self> {
        let source = BetaSource::new(beta, rng)?;
        Self::with_source(Box::new(source), t_max)
    }

    /// Fresh state driven by any probability source.
    pub fn with_source(source: Box<dyn ProbabilitySource>, t_max: Time) -> SimResult<Self> {
        if t_max == 0 {
            return Err(SimError::precondition("tMax must be a positive integer"));
        }
        let len = capacity_len(t_max)?;
        let mut cdf = allocate::<Quad>(len, t_max)?;
        cdf.resize(len, Quad::ZERO);
        cdf[0] = Quad::ONE;
        Ok(Self {
            time: 0,
            t_max,
            cdf,
            source,
            draws: allocate(len, t_max)?,
        })
    }

    /// Rebuild a state from a saved valid prefix `Z(0..=time, time)`.
    ///
    /// `t_max` sizes the new allocation and may differ from the capacity
    /// the prefix was saved with, as long as it still holds `time`.
    pub fn from_prefix(
        source: Box<dyn ProbabilitySource>,
        t_max: Time,
        time: Time,
        prefix: &[Quad],
    ) -> SimResult<Self> {
        if time > t_max {
            return Err(SimError::precondition(format!(
                "time {time} exceeds tMax {t_max}"
            )));
        }
        if prefix.len() as u64 != time + 1 {
            return Err(SimError::precondition(format!(
                "prefix holds {} values, time {time} needs {}",
                prefix.len(),
                time + 1
            )));
        }
        let mut engine = Self::with_source(source, t_max)?;
        engine.cdf[..prefix.len()].copy_from_slice(prefix);
        engine.time = time;
        Ok(engine)
    }

    // ── Accessors ──────────────────────────────────────────────

    pub fn time(&self) -> Time { self.time }
    pub fn t_max(&self) -> Time { self.t_max }
    pub fn beta(&self) -> f64 { self.source.beta() }

    pub fn set_beta(&mut self, beta: f64) -> SimResult<()> {
        self.source.set_beta(beta)
    }

    pub fn seed(&self) -> u64 { self.source.seed() }

    pub fn set_seed(&mut self, seed: u64) {
        self.source.set_seed(seed);
    }

    /// The full allocation, zero padded past the frontier.
    pub fn cdf(&self) -> &[Quad] {
        &self.cdf
    }

    /// Only the entries meaningful at the current time.
    pub fn save_cdf(&self) -> &[Quad] {
        &self.cdf[..=self.time as usize]
    }

    /// Positions of the valid entries: `x = 2n - t`.
    pub fn xvals(&self) -> impl Iterator<Item = Position> + '_ {
        let t = self.time as Position;
        (0..=t).map(move |n| 2 * n - t)
    }

    pub fn at_capacity(&self) -> bool {
        self.time >= self.t_max
    }

    // ── Evolution ──────────────────────────────────────────────

    /// Advance one step. Rejected, with nothing drawn or written, at tMax.
    pub fn iterate_time_step(&mut self) -> SimResult<()> {
        if self.at_capacity() {
            return Err(SimError::CapacityExceeded { time: self.time, t_max: self.t_max });
        }

        let frontier = self.time as usize + 1;

        self.draws.clear();
        for _ in 1..=frontier {
            self.draws.push(self.source.sample());
        }

        // Descending so Z(n-1, t) is still the old row when cell n reads it.
        // Z(frontier, t) is zero, which makes the top cell B * Z(t, t).
        for n in (1..=frontier).rev() {
            let b = self.draws[n - 1];
            let below = self.cdf[n - 1];
            let here = self.cdf[n];
            self.cdf[n] = here + (below - here) * b;
        }
        self.cdf[0] = Quad::ONE;

        self.time += 1;
        Ok(())
    }

    /// Step until `time == target`. A target beyond tMax fails up front.
    pub fn evolve_to_time(&mut self, target: Time) -> SimResult<()> {
        if target > self.t_max {
            return Err(SimError::CapacityExceeded { time: target, t_max: self.t_max });
        }
        while self.time < target {
            self.iterate_time_step()?;
        }
        Ok(())
    }

    /// Step `steps` times. Fails up front if that would pass tMax.
    pub fn evolve_timesteps(&mut self, steps: Time) -> SimResult<()> {
        let target = self.time.checked_add(steps).ok_or(SimError::CapacityExceeded {
            time:  Time::MAX,
            t_max: self.t_max,
        })?;
        self.evolve_to_time(target)
    }
}

fn capacity_len(t_max: Time) -> SimResult<usize> {
    t_max
        .checked_add(1)
        .and_then(|len| usize::try_from(len).ok())
        .filter(|&len| {
            len.checked_mul(std::mem::size_of::<Quad>())
                .is_some_and(|bytes| bytes <= isize::MAX as usize)
        })
        .ok_or_else(|| SimError::precondition(format!("tMax {t_max} cannot be allocated")))
}

/// Empty vector with room for `len` items, or a precondition error if the
/// allocator refuses.
fn allocate<T>(len: usize, t_max: Time) -> SimResult<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|e| {
        SimError::precondition(format!("tMax {t_max} cannot be allocated: {e}"))
    })?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn half_engine(t_max: Time) -> CdfEngine {
        CdfEngine::new(f64::INFINITY, t_max, EnvironmentRng::new(0)).unwrap()
    }

    #[test]
    fn starts_with_unit_mass_at_origin() {
        let engine = half_engine(4);
        assert_eq!(engine.time(), 0);
        assert_eq!(engine.cdf().len(), 5);
        assert_eq!(engine.save_cdf(), &[Quad::ONE]);
        assert_eq!(engine.xvals().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn deterministic_environment_gives_binomial_tails() {
        let mut engine = half_engine(2);
        engine.iterate_time_step().unwrap();
        assert_eq!(engine.save_cdf(), &[Quad::ONE, Quad::from(0.5)]);
        engine.iterate_time_step().unwrap();
        assert_eq!(
            engine.save_cdf(),
            &[Quad::ONE, Quad::from(0.75), Quad::from(0.25)]
        );
        assert_eq!(engine.xvals().collect::<Vec<_>>(), vec![-2, 0, 2]);
    }

    #[test]
    fn rejects_zero_capacity() {
        assert!(CdfEngine::new(1.0, 0, EnvironmentRng::new(0)).is_err());
    }

    #[test]
    fn oversized_capacity_is_an_error() {
        for t_max in [u64::MAX, 1_000_000_000_000_000_000] {
            let err = CdfEngine::new(1.0, t_max, EnvironmentRng::new(0));
            assert!(matches!(err, Err(SimError::Precondition(_))), "tMax {t_max}");
        }
    }

    #[test]
    fn from_prefix_can_grow_capacity() {
        let src = Box::new(BetaSource::seeded(1.0, 0).unwrap());
        let prefix = [Quad::ONE, Quad::from(0.5)];
        let engine = CdfEngine::from_prefix(src, 9, 1, &prefix).unwrap();
        assert_eq!(engine.t_max(), 9);
        assert_eq!(engine.cdf().len(), 10);
        assert_eq!(engine.save_cdf(), &prefix);

        let src = Box::new(BetaSource::seeded(1.0, 0).unwrap());
        assert!(CdfEngine::from_prefix(src, 0, 1, &prefix).is_err());
    }

    #[test]
    fn from_prefix_checks_length() {
        let src = Box::new(BetaSource::seeded(1.0, 0).unwrap());
        let err = CdfEngine::from_prefix(src, 5, 2, &[Quad::ONE]);
        assert!(matches!(err, Err(SimError::Precondition(_))));
    }
}
