use thiserror::Error;

/// A result type for multi-output GP modeling
pub type Result<T> = std::result::Result<T, MogpError>;

/// An error when building a multi-output model or estimating its parameters
#[derive(Error, Debug)]
pub enum MogpError {
    /// When likelihood computation fails
    #[error("Likelihood computation error: {0}")]
    LikelihoodComputationError(String),
    /// When linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When spectral density estimation fails
    #[error("Spectral estimation error: {0}")]
    SpectralEstimationError(String),
    /// When a value is invalid
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
    /// When a linfa error occurs
    #[error(transparent)]
    LinfaError(#[from] linfa::error::Error),
}
