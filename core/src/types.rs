//! Shared primitive types used across the entire simulation.

/// A discrete time step. One step = one move of every walker.
pub type Time = u64;

/// A spatial coordinate on the walk lattice: `x = 2n - t`.
pub type Position = i64;

/// The identifier used to name checkpoint files.
pub type SystemId = String;
