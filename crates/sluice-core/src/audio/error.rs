//! Audio backend error types

use thiserror::Error;

use crate::ring::RingError;

/// Result codes a platform buffer-queue API can report
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Preconditions violated")]
    PreconditionsViolated,
    #[error("Parameter invalid")]
    ParameterInvalid,
    #[error("Memory failure")]
    MemoryFailure,
    #[error("Resource error")]
    ResourceError,
    #[error("Resource lost")]
    ResourceLost,
    #[error("I/O error")]
    IoError,
    #[error("Buffer insufficient")]
    BufferInsufficient,
    #[error("Content corrupted")]
    ContentCorrupted,
    #[error("Content unsupported")]
    ContentUnsupported,
    #[error("Content not found")]
    ContentNotFound,
    #[error("Permission denied")]
    PermissionDenied,
    #[error("Feature unsupported")]
    FeatureUnsupported,
    #[error("Internal error")]
    InternalError,
    #[error("Unknown error")]
    UnknownError,
    #[error("Operation aborted")]
    OperationAborted,
    #[error("Control lost")]
    ControlLost,
    #[error("ReadOnly")]
    ReadOnly,
    #[error("Engine option unsupported")]
    EngineOptionUnsupported,
    #[error("Source/Sink incompatible")]
    SourceSinkIncompatible,
    #[error("Unknown error code")]
    Other(u32),
}

impl PlatformError {
    /// Numeric result code
    pub fn code(&self) -> u32 {
        match self {
            PlatformError::PreconditionsViolated => 0x01,
            PlatformError::ParameterInvalid => 0x02,
            PlatformError::MemoryFailure => 0x03,
            PlatformError::ResourceError => 0x04,
            PlatformError::ResourceLost => 0x05,
            PlatformError::IoError => 0x06,
            PlatformError::BufferInsufficient => 0x07,
            PlatformError::ContentCorrupted => 0x08,
            PlatformError::ContentUnsupported => 0x09,
            PlatformError::ContentNotFound => 0x0A,
            PlatformError::PermissionDenied => 0x0B,
            PlatformError::FeatureUnsupported => 0x0C,
            PlatformError::InternalError => 0x0D,
            PlatformError::UnknownError => 0x0E,
            PlatformError::OperationAborted => 0x0F,
            PlatformError::ControlLost => 0x10,
            PlatformError::ReadOnly => 0x11,
            PlatformError::EngineOptionUnsupported => 0x12,
            PlatformError::SourceSinkIncompatible => 0x13,
            PlatformError::Other(code) => *code,
        }
    }

    /// Map a numeric result code back to its variant
    pub fn from_code(code: u32) -> Self {
        match code {
            0x01 => PlatformError::PreconditionsViolated,
            0x02 => PlatformError::ParameterInvalid,
            0x03 => PlatformError::MemoryFailure,
            0x04 => PlatformError::ResourceError,
            0x05 => PlatformError::ResourceLost,
            0x06 => PlatformError::IoError,
            0x07 => PlatformError::BufferInsufficient,
            0x08 => PlatformError::ContentCorrupted,
            0x09 => PlatformError::ContentUnsupported,
            0x0A => PlatformError::ContentNotFound,
            0x0B => PlatformError::PermissionDenied,
            0x0C => PlatformError::FeatureUnsupported,
            0x0D => PlatformError::InternalError,
            0x0E => PlatformError::UnknownError,
            0x0F => PlatformError::OperationAborted,
            0x10 => PlatformError::ControlLost,
            0x11 => PlatformError::ReadOnly,
            0x12 => PlatformError::EngineOptionUnsupported,
            0x13 => PlatformError::SourceSinkIncompatible,
            other => PlatformError::Other(other),
        }
    }

    /// Message with the failing operation and the raw code
    pub fn describe(&self, what: &str) -> String {
        format!("{}: {} ({:#08x})", what, self, self.code())
    }
}

/// Errors surfaced by backends to the application
#[derive(Error, Debug)]
pub enum BackendError {
    /// Requested endpoint does not exist
    #[error("Device name \"{0}\" not found")]
    NotFound(String),

    /// A platform call failed
    #[error("{0}")]
    Device(String),

    /// Buffer storage could not be reserved
    #[error("Allocation failed: {0}")]
    Allocation(String),

    /// A cursor or read request went past the available space
    #[error("Overflow: requested {requested}, only {available} available")]
    Overflow { requested: usize, available: usize },

    /// Operation not valid in the current lifecycle state
    #[error("Invalid state for {operation}: {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// Backend does not provide this capability
    #[error("Not supported: {0}")]
    NotSupported(&'static str),
}

impl BackendError {
    /// Device error for a failed platform call
    pub fn platform(what: &str, err: PlatformError) -> Self {
        BackendError::Device(err.describe(what))
    }
}

impl From<RingError> for BackendError {
    fn from(err: RingError) -> Self {
        match err {
            RingError::Allocation { .. } => BackendError::Allocation(err.to_string()),
            RingError::Overflow {
                requested,
                available,
            } => BackendError::Overflow {
                requested,
                available,
            },
        }
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for code in 1..=0x13 {
            assert_eq!(PlatformError::from_code(code).code(), code);
        }
        assert_eq!(PlatformError::from_code(0x99), PlatformError::Other(0x99));
    }

    #[test]
    fn test_describe_includes_code() {
        let msg = PlatformError::IoError.describe("Failed to queue audio");
        assert_eq!(msg, "Failed to queue audio: I/O error (0x000006)");
    }

    #[test]
    fn test_ring_error_conversion() {
        let err: BackendError = RingError::Overflow {
            requested: 3,
            available: 1,
        }
        .into();
        assert!(matches!(
            err,
            BackendError::Overflow {
                requested: 3,
                available: 1
            }
        ));
    }
}
