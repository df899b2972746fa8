//! Error types for the column-generation core.

use thiserror::Error;

/// Errors that can occur during a column-generation run.
#[derive(Error, Debug)]
pub enum CgError {
    /// Input validation failed (dimension mismatch, empty measurement, ...).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Master LP solve failed.
    #[error("Master solve failed: {0}")]
    MasterSolveError(String),

    /// A slave session failed on the synchronous dispatch path.
    ///
    /// Failures inside asynchronous workers are caught at the worker
    /// boundary and never surface as this variant.
    #[error("Slave session failed: {0}")]
    SessionError(String),

    /// Warm-start values do not match the warm-start columns.
    #[error("Warm start mismatch: {columns} columns but {values} values")]
    WarmStartMismatch {
        /// Number of warm-start columns.
        columns: usize,
        /// Number of warm-start values.
        values: usize,
    },

    /// Statistics output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for column-generation operations.
pub type CgResult<T> = Result<T, CgError>;
