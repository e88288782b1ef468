use std::path::PathBuf;
use thiserror::Error;

use crate::types::Time;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Cannot evolve past tMax: time {time}, tMax {t_max}")]
    CapacityExceeded { time: Time, t_max: Time },

    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// Only an inconsistent prefix (longer than `time + 1` valid entries)
    /// can produce this.
    #[error("Velocity {velocity} outside [-1, 1]: recurrence state is inconsistent")]
    VelocityOutOfRange { velocity: f64 },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Checkpoint failures, kept apart from computation errors so callers can
/// tell "no checkpoint available" from "corrupt checkpoint".
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Cannot save state without an id")]
    MissingId,

    #[error("Checkpoint file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Corrupt checkpoint {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("Failed to write checkpoint {}: {source}", path.display())]
    Write {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type SimResult<T> = Result<T, SimError>;

impl SimError {
    pub(crate) fn precondition(msg: impl Into<String>) -> Self {
        SimError::Precondition(msg.into())
    }
}
