//! Error types for the correlation pipeline

use opencl3::error_codes::ClError;
use thiserror::Error;

/// Main error type for pipeline operations
///
/// Variants follow the failure taxonomy of the pipeline: configuration
/// problems are caught before any device work, allocation and device errors
/// carry the OpenCL status that produced them, and sequencing errors signal
/// a caller bug rather than a device condition.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration value, rejected before construction
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Invalid argument to a runtime operation
    #[error("invalid input: {0}")]
    Input(String),

    /// Device buffer allocation failure
    #[error("failed to allocate {what}: {source}")]
    Allocation {
        what: &'static str,
        #[source]
        source: ClError,
    },

    /// OpenCL runtime error from an enqueue or query
    #[error("{op} failed: {source}")]
    Device {
        op: &'static str,
        #[source]
        source: ClError,
    },

    /// clFFT returned a non-success status
    #[error("clFFT {op} failed for {plan} (status {status})")]
    Fft {
        op: &'static str,
        plan: &'static str,
        status: i32,
    },

    /// A pipeline step was invoked before its prerequisite completed
    #[error("sequencing violation: {attempted} requires {required}")]
    Sequencing {
        attempted: &'static str,
        required: &'static str,
    },

    /// Device resources were already released
    #[error("pipeline already cleaned up")]
    CleanedUp,

    /// A buffer's allocated size does not match the planned layout
    #[error("buffer size mismatch for {what}: expected {expected} bytes, actual {actual}")]
    SizeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// No usable OpenCL platform or device
    #[error("no OpenCL device available: {0}")]
    NoDevice(String),
}

impl Error {
    pub(crate) fn device(op: &'static str, source: ClError) -> Self {
        Error::Device { op, source }
    }

    pub(crate) fn allocation(what: &'static str, source: ClError) -> Self {
        Error::Allocation { what, source }
    }
}
