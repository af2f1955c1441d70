//! Error types for normalizar
//!
//! Recoverable errors cover tensor construction and other caller-facing
//! surfaces. The normalization kernel itself is fail-fast: contract
//! violations abort via assertions rather than returning an error, because
//! continuing with a misconfigured kernel would silently corrupt numeric
//! results.

use thiserror::Error;

/// Result type alias for normalizar operations
pub type Result<T> = std::result::Result<T, NormalizarError>;

/// Error type for normalizar operations
#[derive(Debug, Error)]
pub enum NormalizarError {
    /// Tensor shape is invalid or inconsistent with the provided data
    #[error("Invalid shape: {reason}")]
    InvalidShape {
        /// Description of the shape problem
        reason: String,
    },
}
