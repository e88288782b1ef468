//! Run configuration.
//!
//! `CheckpointConfig` is what the simulation itself needs. `RunConfig` is
//! the JSON document the runner reads: system parameters plus the recording
//! schedule.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::types::{SystemId, Time};

/// Default gap between automatic checkpoints: six hours.
pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(6 * 3600);

#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointConfig {
    pub save_interval: Duration,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self { save_interval: DEFAULT_SAVE_INTERVAL }
    }
}

/// What the runner records at each scheduled time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordMode {
    /// Quantile positions.
    Quantiles,
    /// Quantile positions and Gumbel variances per particle count.
    Variance,
    /// Probability and velocity of a single quantile.
    Velocity,
}

impl std::str::FromStr for RecordMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "quantiles" => Ok(Self::Quantiles),
            "variance" => Ok(Self::Variance),
            "velocity" => Ok(Self::Velocity),
            other => anyhow::bail!("unknown mode '{other}' (quantiles | variance | velocity)"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub beta: f64,
    pub t_max: Time,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub id: Option<SystemId>,
    #[serde(default = "default_save_dir")]
    pub save_dir: PathBuf,
    #[serde(default = "default_save_interval_secs")]
    pub save_interval_secs: u64,
    #[serde(default = "default_mode")]
    pub mode: RecordMode,
    /// Times at which a row is recorded. Ascending.
    #[serde(default)]
    pub times: Vec<Time>,
    /// Quantiles for `quantiles` mode.
    #[serde(default)]
    pub quantiles: Vec<f64>,
    /// Particle counts for `variance` mode.
    #[serde(default)]
    pub n_particles: Vec<f64>,
    /// Quantile for `velocity` mode.
    #[serde(default)]
    pub quantile: Option<f64>,
    #[serde(default = "default_output")]
    pub output: PathBuf,
    #[serde(default)]
    pub append: bool,
}

fn default_save_dir() -> PathBuf { PathBuf::from(".") }
fn default_save_interval_secs() -> u64 { DEFAULT_SAVE_INTERVAL.as_secs() }
fn default_mode() -> RecordMode { RecordMode::Quantiles }
fn default_output() -> PathBuf { PathBuf::from("quantiles.csv") }

impl RunConfig {
    /// Defaults for everything but the two required parameters.
    pub fn new(beta: f64, t_max: Time) -> Self {
        Self {
            beta,
            t_max,
            seed: None,
            id: None,
            save_dir: default_save_dir(),
            save_interval_secs: default_save_interval_secs(),
            mode: default_mode(),
            times: Vec::new(),
            quantiles: Vec::new(),
            n_particles: Vec::new(),
            quantile: None,
            output: default_output(),
            append: false,
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading run config {}", path.display()))?;
        let config: RunConfig = serde_json::from_str(&content)
            .with_context(|| format!("parsing run config {}", path.display()))?;
        Ok(config)
    }

    pub fn checkpoint(&self) -> CheckpointConfig {
        CheckpointConfig {
            save_interval: Duration::from_secs(self.save_interval_secs),
        }
    }

    /// Recording times default to every step up to tMax.
    pub fn schedule(&self) -> Vec<Time> {
        if self.times.is_empty() {
            (1..=self.t_max).collect()
        } else {
            self.times.clone()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.t_max == 0 {
            anyhow::bail!("t_max must be positive");
        }
        if self.beta.is_nan() || self.beta < 0.0 {
            anyhow::bail!("beta must be >= 0, got {}", self.beta);
        }
        if !self.times.windows(2).all(|w| w[0] <= w[1]) {
            anyhow::bail!("times must be ascending");
        }
        if let Some(&last) = self.times.last() {
            if last > self.t_max {
                anyhow::bail!("time {last} exceeds t_max {}", self.t_max);
            }
        }
        let below_one = |q: &f64| !(*q >= 1.0);
        match self.mode {
            RecordMode::Quantiles => {
                if self.quantiles.is_empty() {
                    anyhow::bail!("quantiles mode needs at least one quantile");
                }
                if self.quantiles.iter().any(below_one) {
                    anyhow::bail!("quantiles must be >= 1");
                }
            }
            RecordMode::Variance => {
                if self.n_particles.is_empty() {
                    anyhow::bail!("variance mode needs at least one particle count");
                }
                if self.n_particles.iter().any(below_one) {
                    anyhow::bail!("particle counts must be >= 1");
                }
            }
            RecordMode::Velocity => match self.quantile {
                Some(q) if q >= 1.0 => {}
                Some(q) => anyhow::bail!("quantile must be >= 1, got {q}"),
                None => anyhow::bail!("velocity mode needs a quantile"),
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_json_fills_defaults() {
        let json = r#"{"beta": 1.0, "t_max": 50, "quantiles": [10.0]}"#;
        let config: RunConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.mode, RecordMode::Quantiles);
        assert_eq!(config.save_interval_secs, 6 * 3600);
        assert_eq!(config.schedule().len(), 50);
        config.validate().unwrap();
    }

    #[test]
    fn validation_catches_bad_schedules() {
        let mut config = RunConfig::new(1.0, 10);
        config.quantiles = vec![2.0];
        config.times = vec![5, 3];
        assert!(config.validate().is_err());
        config.times = vec![3, 11];
        assert!(config.validate().is_err());
        config.times = vec![3, 10];
        config.validate().unwrap();
        config.quantiles = vec![0.5];
        assert!(config.validate().is_err());
    }

    #[test]
    fn velocity_mode_needs_quantile() {
        let mut config = RunConfig::new(1.0, 10);
        config.mode = RecordMode::Velocity;
        assert!(config.validate().is_err());
        config.quantile = Some(100.0);
        config.validate().unwrap();
    }

    #[test]
    fn mode_parses_from_flag() {
        assert_eq!("variance".parse::<RecordMode>().unwrap(), RecordMode::Variance);
        assert!("plot".parse::<RecordMode>().is_err());
    }
}
