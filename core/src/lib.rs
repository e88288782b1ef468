//! Random-walk-in-random-environment CDF simulation.
//!
//! The core is a Barraquand–Corwin recurrence over a triangular state,
//! advanced one time step at a time in extended precision, queried for
//! quantile positions and extreme-value statistics, and checkpointed so
//! long runs survive interruption.

pub mod clock;
pub mod config;
pub mod diffusion;
pub mod engine;
pub mod error;
pub mod numeric;
pub mod quantile;
pub mod recorder;
pub mod rng;
pub mod snapshot;
pub mod statistics;
pub mod types;

pub use diffusion::{DiffusionTimeCdf, SimState};
pub use error::{PersistenceError, SimError, SimResult};
pub use numeric::Quad;
