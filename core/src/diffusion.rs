//! `DiffusionTimeCdf`: the simulation as callers see it.
//!
//! Composes the recurrence engine, the quantile and statistics queries, and
//! checkpointing, and owns the time-triggered auto-save policy.
//!
//! STATE MACHINE:
//!   Ready(0) -> Ready(1) -> ... -> Terminal(tMax)
//!   Every Ready state accepts a step; Terminal rejects it with
//!   CapacityExceeded. Any state accepts queries and `save_state` (given
//!   an id).
//!
//! RULES:
//!   - Capacity is checked before the save throttle: a rejected step has
//!     no side effects, on disk or in memory.
//!   - When the throttle is due, the checkpoint is taken before the step,
//!     so it records the last fully completed time.
//!   - One caller drives an instance. Nothing here is shared or locked.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::{
    clock::{SaveThrottle, SystemClock, WallClock},
    config::CheckpointConfig,
    engine::CdfEngine,
    error::{PersistenceError, SimError, SimResult},
    numeric::Quad,
    quantile,
    rng::{BetaSource, EnvironmentRng},
    snapshot::{self, Checkpoint, ScalarRecord},
    statistics::{self, ProbAndVelocity},
    types::{Position, SystemId, Time},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimState {
    Ready { time: Time },
    Terminal { time: Time },
}

pub struct DiffusionTimeCdf {
    engine:   CdfEngine,
    id:       Option<SystemId>,
    save_dir: PathBuf,
    throttle: SaveThrottle,
}

impl DiffusionTimeCdf {
    /// New system seeded from the thread RNG (the seed is logged).
    pub fn new(beta: f64, t_max: Time) -> SimResult<Self> {
        let engine = CdfEngine::new(beta, t_max, EnvironmentRng::from_thread_seed())?;
        Ok(Self::from_engine(engine, CheckpointConfig::default()))
    }

    /// New system with a reproducible environment.
    pub fn with_seed(beta: f64, t_max: Time, seed: u64) -> SimResult<Self> {
        let engine = CdfEngine::new(beta, t_max, EnvironmentRng::new(seed))?;
        Ok(Self::from_engine(engine, CheckpointConfig::default()))
    }

    pub fn from_engine(engine: CdfEngine, checkpoint: CheckpointConfig) -> Self {
        Self {
            engine,
            id: None,
            save_dir: PathBuf::from("."),
            throttle: SaveThrottle::new(Box::new(SystemClock::new()), checkpoint.save_interval),
        }
    }

    /// Rebuild a system from its checkpoint files.
    ///
    /// The environment stream is not part of a checkpoint: the resumed
    /// system draws from a fresh seed unless `set_beta_seed` is called.
    pub fn from_files(cdf_file: &Path, scalars_file: &Path) -> SimResult<Self> {
        let checkpoint = snapshot::load(cdf_file, scalars_file)?;
        let t_max = checkpoint.record.t_max;
        // The capacity came from the file, so a bad one is a bad file.
        Self::restore(checkpoint, t_max).map_err(|e| match e {
            SimError::Precondition(reason) => snapshot::corrupt(scalars_file, reason),
            other => other,
        })
    }

    /// Rebuild a system from its checkpoint files with a new capacity.
    /// `t_max` must still hold the saved time.
    pub fn from_files_with_t_max(cdf_file: &Path, scalars_file: &Path, t_max: Time) -> SimResult<Self> {
        let checkpoint = snapshot::load(cdf_file, scalars_file)?;
        if t_max < checkpoint.record.time {
            return Err(SimError::precondition(format!(
                "tMax {t_max} is below the saved time {}",
                checkpoint.record.time
            )));
        }
        if t_max != checkpoint.record.t_max {
            log::info!(
                "resizing {} from tMax {} to {t_max}",
                checkpoint.record.id,
                checkpoint.record.t_max
            );
        }
        Self::restore(checkpoint, t_max)
    }

    fn restore(checkpoint: Checkpoint, t_max: Time) -> SimResult<Self> {
        let record = checkpoint.record;
        let source = BetaSource::new(record.beta, EnvironmentRng::from_thread_seed())?;
        let engine = CdfEngine::from_prefix(Box::new(source), t_max, record.time, &checkpoint.cdf)?;
        let mut system = Self::from_engine(engine, CheckpointConfig::default());
        system.id = Some(record.id);
        system.save_dir = record.save_dir;
        Ok(system)
    }

    /// Swap the clock behind the save throttle. Restarts the interval.
    pub fn set_clock(&mut self, clock: Box<dyn WallClock>) {
        let interval = self.throttle.interval();
        self.throttle = SaveThrottle::new(clock, interval);
    }

    pub fn set_save_interval(&mut self, interval: std::time::Duration) {
        self.throttle.set_interval(interval);
    }

    // ── Accessors ──────────────────────────────────────────────

    pub fn time(&self) -> Time { self.engine.time() }
    pub fn t_max(&self) -> Time { self.engine.t_max() }
    pub fn beta(&self) -> f64 { self.engine.beta() }

    pub fn set_beta(&mut self, beta: f64) -> SimResult<()> {
        self.engine.set_beta(beta)
    }

    pub fn seed(&self) -> u64 { self.engine.seed() }

    /// Restart the environment stream from `seed`.
    pub fn set_beta_seed(&mut self, seed: u64) {
        self.engine.set_seed(seed);
    }

    pub fn id(&self) -> Option<&str> { self.id.as_deref() }

    pub fn set_id(&mut self, id: impl Into<SystemId>) {
        self.id = Some(id.into());
    }

    pub fn save_dir(&self) -> &Path { &self.save_dir }

    pub fn set_save_dir(&mut self, dir: impl Into<PathBuf>) {
        self.save_dir = dir.into();
    }

    pub fn cdf(&self) -> &[Quad] { self.engine.cdf() }
    pub fn save_cdf(&self) -> &[Quad] { self.engine.save_cdf() }

    pub fn xvals(&self) -> impl Iterator<Item = Position> + '_ {
        self.engine.xvals()
    }

    pub fn state(&self) -> SimState {
        let time = self.time();
        if self.engine.at_capacity() {
            SimState::Terminal { time }
        } else {
            SimState::Ready { time }
        }
    }

    // ── Evolution ──────────────────────────────────────────────

    pub fn iterate_time_step(&mut self) -> SimResult<()> {
        if self.engine.at_capacity() {
            return Err(SimError::CapacityExceeded { time: self.time(), t_max: self.t_max() });
        }
        self.checkpoint_if_due()?;
        self.engine.iterate_time_step()
    }

    /// Step until `time == target`; a target past tMax fails before any step.
    pub fn evolve_to_time(&mut self, target: Time) -> SimResult<()> {
        if target > self.t_max() {
            return Err(SimError::CapacityExceeded { time: target, t_max: self.t_max() });
        }
        while self.time() < target {
            self.iterate_time_step()?;
        }
        Ok(())
    }

    pub fn evolve_timesteps(&mut self, steps: Time) -> SimResult<()> {
        let target = self.time().checked_add(steps).ok_or(SimError::CapacityExceeded {
            time:  Time::MAX,
            t_max: self.t_max(),
        })?;
        self.evolve_to_time(target)
    }

    fn checkpoint_if_due(&mut self) -> SimResult<()> {
        if !self.throttle.due() {
            return Ok(());
        }
        if self.id.is_none() {
            log::warn!(
                "checkpoint due at time {} but no id is set; skipping",
                self.time()
            );
            self.throttle.mark_saved();
            return Ok(());
        }
        self.save_state()?;
        Ok(())
    }

    // ── Queries ────────────────────────────────────────────────

    /// First position where `Z` falls to `1/quantile` or below.
    pub fn find_quantile(&self, quantile: impl Into<Quad>) -> SimResult<Position> {
        quantile::find_quantile(self.save_cdf(), self.time(), quantile.into())
    }

    /// Batched `find_quantile`; results line up with `quantiles`.
    pub fn find_quantiles(&self, quantiles: &[Quad], descending: bool) -> SimResult<Vec<Position>> {
        quantile::find_quantiles(self.save_cdf(), self.time(), quantiles, descending)
    }

    pub fn gumbel_variance(&self, n_particles: f64) -> SimResult<f64> {
        statistics::gumbel_variance(self.save_cdf(), self.time(), n_particles)
    }

    pub fn gumbel_variances(&self, n_particles: &[f64]) -> SimResult<Vec<f64>> {
        statistics::gumbel_variances(self.save_cdf(), self.time(), n_particles)
    }

    pub fn prob_and_v(&self, quantile: impl Into<Quad>) -> SimResult<ProbAndVelocity> {
        statistics::prob_and_v(self.save_cdf(), self.time(), quantile.into())
    }

    // ── Checkpoint ─────────────────────────────────────────────

    /// Write `CDF{id}.txt` and `Scalars{id}.json` into the save directory.
    pub fn save_state(&mut self) -> SimResult<(PathBuf, PathBuf)> {
        let id = self.id.clone().ok_or(PersistenceError::MissingId)?;
        let record = ScalarRecord {
            time:     self.time(),
            beta:     self.beta(),
            t_max:    self.t_max(),
            id,
            save_dir: self.save_dir.clone(),
            saved_at: Some(Utc::now()),
        };
        let paths = snapshot::save(&record, self.save_cdf())?;
        self.throttle.mark_saved();
        log::info!("saved state of {} at time {}", record.id, record.time);
        Ok(paths)
    }

    /// Paths `save_state` writes to, if an id is set.
    pub fn checkpoint_paths(&self) -> Option<(PathBuf, PathBuf)> {
        self.id
            .as_deref()
            .map(|id| snapshot::checkpoint_paths(&self.save_dir, id))
    }
}

impl fmt::Display for DiffusionTimeCdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DiffusionTimeCDF(beta={}, time={})", self.beta(), self.time())
    }
}

impl fmt::Debug for DiffusionTimeCdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiffusionTimeCdf")
            .field("beta", &self.beta())
            .field("time", &self.time())
            .field("t_max", &self.t_max())
            .field("id", &self.id)
            .field("save_dir", &self.save_dir)
            .finish()
    }
}

/// Same identity, parameters, time and every allocated entry. The
/// environment stream and the throttle are process-local and ignored.
impl PartialEq for DiffusionTimeCdf {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.save_dir == other.save_dir
            && self.beta() == other.beta()
            && self.time() == other.time()
            && self.t_max() == other.t_max()
            && self.cdf() == other.cdf()
    }
}
