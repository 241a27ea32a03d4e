//! Error types for gridslam

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// gridslam error types
///
/// Numerical problems inside the estimator are never reported through this type; they are absorbed into the
/// particle weights instead. Only setup and I/O failures surface as errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Rejection sampling could not find a valid pose within the attempt budget
    #[error("no valid position found for particle {particle} after {attempts} attempts")]
    InitializationExhausted {
        /// Index of the particle being placed
        particle: usize,
        /// Number of attempts made
        attempts: usize,
    },

    /// The simulated agent could not be placed on a free cell
    #[error("no free cell found for the agent after {attempts} attempts")]
    AgentPlacementExhausted { attempts: usize },

    /// Configuration values are out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Command string does not name a direction
    #[error("unknown direction: {0:?}")]
    UnknownDirection(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV serialization error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
