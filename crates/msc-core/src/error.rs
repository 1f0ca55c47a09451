//! Error types for the calibration engine

use thiserror::Error;

/// Calibration error type
///
/// `Configuration` and `Parse` are fatal and surface before any fit iteration runs.
/// Numeric degeneracies and table-bounds hits are not errors: they are counted
/// and skipped by the likelihood driver.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// Unknown function type, mismatched parameter counts, invalid run settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Parameter-file format violation
    #[error("Parse error at line {line}: {message}")]
    Parse {
        /// 1-based line number (0 when the error is not tied to a line)
        line: usize,
        /// Description of the violation
        message: String,
    },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),

    /// A long-running stage was cancelled by the caller
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl Error {
    /// Parse error at a 1-based line number.
    pub fn parse_at(line: usize, message: impl Into<String>) -> Self {
        Error::Parse { line, message: message.into() }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
