//! Error types for the AMC toolchain

use thiserror::Error;

use crate::types::Time;

/// Result type used across the AMC crates
pub type Result<T> = std::result::Result<T, AmcError>;

/// Errors that abort a run.
///
/// An unschedulable task set is not an error: the analyzer reports it as a
/// verdict and the caller decides what to do with it.
#[derive(Error, Debug)]
pub enum AmcError {
    /// Task-set input violates the task model (missing budget, duplicate rank, ...)
    #[error("Malformed task set: {0}")]
    MalformedTaskSet(String),

    /// Configuration error (generator parameters, CLI values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Simulation parameters do not fit the task set
    #[error("Invalid scenario: {0}")]
    InvalidScenario(String),

    /// Internal invariant of the simulator broken; indicates a logic defect
    #[error("Simulation inconsistency at t={time}: {detail}")]
    SimulationInconsistency { time: Time, detail: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AmcError {
    /// Create a malformed task-set error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedTaskSet(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid scenario error
    pub fn scenario(msg: impl Into<String>) -> Self {
        Self::InvalidScenario(msg.into())
    }

    /// Create a simulation inconsistency error
    pub fn inconsistency(time: Time, detail: impl Into<String>) -> Self {
        Self::SimulationInconsistency {
            time,
            detail: detail.into(),
        }
    }

    /// Whether the error is caused by the input rather than by a defect
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedTaskSet(_) | Self::Config(_) | Self::InvalidScenario(_) | Self::Json(_)
        )
    }
}
