/// Error types shared by the lake simulation crates
use thiserror::Error;

/// Main error type for preparing and running a site
#[derive(Error, Debug)]
pub enum LakeError {
    /// Bad or missing parameter, detected before a site runs
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Observation source unreachable or answered with a non-2xx status
    #[error("Failed to fetch {quantity} from {source_id}: {reason}")]
    Fetch {
        quantity: String,
        source_id: String,
        reason: String,
    },

    /// Continuation-mode fill needs a previous series that is not on disk
    #[error("Missing history: {0}")]
    MissingHistory(String),

    /// Date ordering or array-length violations
    #[error("Validation failed: {0}")]
    Validation(String),

    /// External simulation process exited non-zero
    #[error("Simulation run failed ({status}): {command}")]
    RunFailure { status: String, command: String },

    /// File system access failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse CSV data
    #[error("Failed to parse CSV: {0}")]
    CsvParse(#[from] csv::Error),

    /// Failed to parse JSON data
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl LakeError {
    /// Build a fetch error for one quantity at one source.
    pub fn fetch(quantity: &str, source_id: &str, reason: impl ToString) -> Self {
        LakeError::Fetch {
            quantity: quantity.to_string(),
            source_id: source_id.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Type alias for Results using LakeError
pub type Result<T> = std::result::Result<T, LakeError>;
