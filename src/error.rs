//! Custom error types for the application.
//!
//! This module defines the primary error type, `ScanError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of errors that can occur,
//! from configuration issues to instrument communication failures.
//!
//! By using `#[from]`, `ScanError` can be seamlessly created from underlying
//! error types, simplifying error handling throughout the application with
//! the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, ScanError>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Configuration file could not be loaded or deserialized.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration parsed but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File or serial I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error originating from an instrument or the bus transport.
    #[error("Instrument error: {0}")]
    Instrument(String),

    /// A reply was received but did not match the expected shape.
    #[error("Return value {0:?} is of invalid type")]
    MalformedReply(String),

    /// A free-form parameter lookup failed because the key is absent.
    #[error("Failed to retrieve parameter with key={0:?}")]
    MissingParameter(String),

    /// A free-form parameter exists but holds a different type.
    #[error("Invalid type for key={key:?} (expected {expected})")]
    ParameterType {
        /// The looked-up key.
        key: String,
        /// Human-readable name of the requested type.
        expected: &'static str,
    },

    /// A `preConfiguration` entry referenced a profile that does not exist.
    #[error("Unknown pre-configuration profile {0:?}")]
    UnknownProfile(String),

    /// Serial bus access was requested in a build without it.
    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    /// A compiled-out feature was requested at runtime.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    /// CSV storage failure.
    #[cfg(feature = "storage_csv")]
    #[error("Storage error: {0}")]
    Storage(#[from] csv::Error),

    /// One or more devices failed to run their closing sequence.
    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<ScanError>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_reply_keeps_offending_text() {
        let err = ScanError::MalformedReply("GARBAGE".into());
        assert!(err.to_string().contains("GARBAGE"));
    }

    #[test]
    fn shutdown_failure_wraps_device_errors() {
        let err = ScanError::ShutdownFailed(vec![
            ScanError::Instrument("ammeter timeout".into()),
            ScanError::Instrument("vsource busy".into()),
        ]);
        match err {
            ScanError::ShutdownFailed(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
