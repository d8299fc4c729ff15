//! Error types for the AR conversion pipeline.

use thiserror::Error;

/// Result type alias using ConvertError.
pub type Result<T> = std::result::Result<T, ConvertError>;

/// Main error type for asset conversion.
#[derive(Error, Debug)]
pub enum ConvertError {
    /// The binary container header or chunk table is invalid.
    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    /// A primitive uses a topology the pipeline cannot keep.
    #[error("Unsupported topology: {0}")]
    UnsupportedTopology(String),

    /// A required vertex attribute or referenced object is missing.
    #[error("Missing attribute: {0}")]
    MissingAttribute(String),

    /// The building-data exchange file produced nothing usable.
    #[error("Exchange file parse failure: {0}")]
    ExchangeParseFailure(String),

    /// Caller-supplied options are unusable; rejected before any pass runs.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A single optimization pass failed and was skipped.
    #[error("Optimization pass '{pass}' failed: {reason}")]
    OptimizationPassFailure { pass: String, reason: String },

    /// The USDZ archive could not be produced.
    #[error("Archive synthesis failure: {0}")]
    ArchiveSynthesisFailure(String),

    /// Failed to parse or serialize JSON data.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvertError {
    /// Whether the error must reject the whole upload.
    ///
    /// Everything else degrades to a reduced feature set.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConvertError::MalformedContainer(_)
                | ConvertError::InvalidConfiguration(_)
                | ConvertError::Json(_)
                | ConvertError::Io(_)
        )
    }

    pub(crate) fn pass(pass: &str, reason: impl Into<String>) -> Self {
        ConvertError::OptimizationPassFailure {
            pass: pass.to_string(),
            reason: reason.into(),
        }
    }
}
