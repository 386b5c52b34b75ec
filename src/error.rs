//! Error types for the driver.
//!
//! `DriverError` consolidates the error kinds that can occur across the
//! calibration pipeline, the camera subprocess adapter, and the bus client.
//! Library code returns `Result<T, DriverError>`; the orchestrator and
//! `main` widen these into `anyhow::Result` at the application edge.

use thiserror::Error;

/// Convenience alias for results using the driver's error type.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("failed to start camera subprocess: {0}")]
    CameraStartFailure(String),

    #[error("frame read error: {0}")]
    FrameReadError(#[from] std::io::Error),

    #[error("grid calibration found too few candidate nodes ({found}, need at least {required})")]
    CalibrationInsufficientData { found: usize, required: usize },

    #[error("grid calibration did not populate node at row {row}, col {col}")]
    CalibrationMissingNode { row: usize, col: usize },

    #[error("bus publish error: {0}")]
    BusPublishError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DriverError::CalibrationMissingNode { row: 3, col: 5 };
        assert_eq!(
            err.to_string(),
            "grid calibration did not populate node at row 3, col 5"
        );
    }

    #[test]
    fn test_insufficient_data_display() {
        let err = DriverError::CalibrationInsufficientData {
            found: 40,
            required: 100,
        };
        assert!(err.to_string().contains("40"));
        assert!(err.to_string().contains("100"));
    }
}
