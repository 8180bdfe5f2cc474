//! Error types for the Bucketeer service.

use thiserror::Error;

/// Main error type for Bucketeer operations.
#[derive(Error, Debug)]
pub enum BucketeerError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The limitation unit key was empty
    #[error("Invalid limitation unit: key must not be empty")]
    InvalidUnit,

    /// The resolved recovery policy cannot drive a bucket
    #[error("Invalid recovery policy for '{unit}': fill_rate={fill_rate}, max_budget={max_budget}")]
    InvalidPolicy {
        unit: String,
        fill_rate: i64,
        max_budget: i64,
    },

    /// The policy resolver failed to produce a policy
    #[error("Policy resolution failed: {0}")]
    Policy(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Bucketeer operations.
pub type Result<T> = std::result::Result<T, BucketeerError>;
