//! Custom error types for the acquisition library.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it gives every failure mode of the scan
//! lifecycle, the signal-processing functions and the configuration layer a
//! single, consistent representation.
//!
//! ## Error Hierarchy
//!
//! - **Initialisation** (`NoDeviceFound`, `AmbiguousDevice`,
//!   `UnsupportedCapability`, `ConnectionFailed`): raised only while the
//!   controller brings the device up. Fatal, never retried automatically.
//! - **Scan lifecycle** (`InvalidScanConfig`, `ScanFault`, `InvalidState`):
//!   raised by scan sessions. `ScanFault` is terminal for the session that
//!   reported it; arming a fresh session recovers.
//! - **Pure validation** (`InvalidFilterParameters`, `UnsupportedWaveform`,
//!   `InsufficientSamples`): raised by the waveform and filter functions and
//!   always correctable by the caller.
//! - **Collaborators** (`Hardware`, `Config`, `Configuration`): failures of the
//!   hardware scan service or of configuration loading.
//!
//! `ShutdownFailed` is only used to report teardown problems collected by
//! [`crate::controller::AcquisitionController::shutdown_report`]; shutdown
//! itself never fails.

use crate::hardware::Direction;
use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("No DAQ devices found")]
    NoDeviceFound,

    #[error("More than one DAQ device found ({count}); exactly one is required")]
    AmbiguousDevice { count: usize },

    #[error("The DAQ device does not support hardware paced analog {direction}")]
    UnsupportedCapability { direction: Direction },

    #[error("The DAQ device is not connected: {0}")]
    ConnectionFailed(String),

    #[error("Invalid scan configuration: {0}")]
    InvalidScanConfig(String),

    #[error("Analog {direction} scan fault: {message}")]
    ScanFault { direction: Direction, message: String },

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Invalid filter parameters: {0}")]
    InvalidFilterParameters(String),

    #[error("Unsupported waveform type '{0}'")]
    UnsupportedWaveform(String),

    #[error("Insufficient samples: filter needs more than {required}, got {actual}")]
    InsufficientSamples { required: usize, actual: usize },

    #[error("Hardware scan service error: {0}")]
    Hardware(String),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Shutdown completed with {} error(s)", .0.len())]
    ShutdownFailed(Vec<DaqError>),
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl DaqError {
    /// Errors after which the acquisition cannot continue without a fresh
    /// initialisation or a new scan session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NoDeviceFound
                | Self::AmbiguousDevice { .. }
                | Self::UnsupportedCapability { .. }
                | Self::ConnectionFailed(_)
                | Self::ScanFault { .. }
                | Self::Hardware(_)
        )
    }

    /// Validation errors the caller can fix by changing its arguments.
    /// These never change any session or controller state.
    pub fn is_caller_correctable(&self) -> bool {
        matches!(
            self,
            Self::InvalidScanConfig(_)
                | Self::InvalidFilterParameters(_)
                | Self::UnsupportedWaveform(_)
                | Self::InsufficientSamples { .. }
                | Self::Configuration(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaqError::InsufficientSamples {
            required: 18,
            actual: 10,
        };
        assert!(err.to_string().contains("18"));
        assert!(err.to_string().contains("10"));

        let err = DaqError::UnsupportedCapability {
            direction: Direction::Output,
        };
        assert_eq!(
            err.to_string(),
            "The DAQ device does not support hardware paced analog output"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(DaqError::NoDeviceFound.is_fatal());
        assert!(!DaqError::NoDeviceFound.is_caller_correctable());
        assert!(DaqError::UnsupportedWaveform("quadrature".into()).is_caller_correctable());
        assert!(DaqError::ScanFault {
            direction: Direction::Input,
            message: "overrun".into()
        }
        .is_fatal());
    }

    #[test]
    fn test_shutdown_failed_counts_errors() {
        let err = DaqError::ShutdownFailed(vec![
            DaqError::Hardware("stop failed".into()),
            DaqError::Hardware("release failed".into()),
        ]);
        assert_eq!(err.to_string(), "Shutdown completed with 2 error(s)");
    }
}
