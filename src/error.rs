//! Custom error types for the application.
//!
//! This module defines the primary error type, `HubError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the failure classes the hubs distinguish:
//!
//! - **`Config` / `Configuration`**: file-level parse errors from `figment`,
//!   and semantic errors caught by the validation step.
//! - **`Device`**: a single poll or capture against a device controller
//!   failed. These are transient by contract: the sampling loops log them
//!   and retry on a longer backoff, they are never fatal.
//! - **`MalformedRequest`**: an unknown command tag or wrong payload type
//!   arrived on a worker channel. Caught at the worker boundary; the worker
//!   answers with an error and keeps running.
//! - **`CalibrationApply`**: one raw spectrum could not be calibrated (bad
//!   shape, non-finite output). The record is skipped, the stream continues.
//! - **`ReferenceNotSet`**: a flatfield operation needs a reference that was
//!   never provided. Image requests soft-fail to the raw frame instead;
//!   only explicit save requests surface this error.
//! - **`WaitTimeout`**: a closest/interpolated query waited past its
//!   deadline for data that never arrived. The original system blocked
//!   indefinitely here; the timeout is now configurable and explicit.
//!
//! By using `#[from]`, `HubError` can be seamlessly created from underlying
//! error types, simplifying error handling with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, HubError>;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Calibration could not be applied: {0}")]
    CalibrationApply(String),

    #[error("Flatfield reference not set")]
    ReferenceNotSet,

    #[error("Timed out after {waited_ms} ms waiting for new data")]
    WaitTimeout { waited_ms: u64 },

    #[error("Worker channel closed")]
    ChannelClosed,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HubError::Device("spectrometer timeout".to_string());
        assert_eq!(err.to_string(), "Device error: spectrometer timeout");
    }

    #[test]
    fn test_wait_timeout_display() {
        let err = HubError::WaitTimeout { waited_ms: 5000 };
        assert!(err.to_string().contains("5000 ms"));
    }
}
