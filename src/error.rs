use std::fmt;

#[cfg(feature = "opencl")]
use opencl3::error_codes::ClError;
#[cfg(feature = "cuda")]
use rustacuda::error::CudaError;

/// The process exit status used for errors that don't carry a native error code.
pub const EXIT_FAILURE: i32 = 1;

/// The first position where the device result differs from the host reference.
///
/// A value is `None` if the corresponding sequence ended before `index`.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationError {
    /// Index of the first mismatching element.
    pub index: usize,
    /// The host-computed value at `index`.
    pub expected: Option<f32>,
    /// The device-computed value at `index`.
    pub actual: Option<f32>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.expected, self.actual) {
            (Some(expected), Some(actual)) => write!(
                f,
                "first mismatch at index {}: expected {}, got {}",
                self.index, expected, actual
            ),
            _ => write!(f, "result lengths differ at index {}", self.index),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Error types of this library.
#[derive(thiserror::Error, Debug)]
#[allow(clippy::upper_case_acronyms)]
pub enum GPUError {
    /// There is no device to select from.
    #[error("No compute device found.")]
    NoDeviceFound,

    /// The requested device index is not within the list of candidates.
    #[error("No device with index {index} found, there are {count} device(s).")]
    IndexOutOfRange {
        /// The requested index.
        index: usize,
        /// The number of candidate devices.
        count: usize,
    },

    /// The device doesn't support loading the requested program representation.
    #[error("Device {device} doesn't support {format} programs.")]
    UnsupportedFormat {
        /// Name of the device.
        device: String,
        /// The requested program representation.
        format: String,
    },

    /// The kernel failed to build, contains the build log of the device.
    #[error("Build failed for device {device} ({code}):\n\n{log}")]
    BuildError {
        /// Name of the device the build log belongs to.
        device: String,
        /// Native error code of the build call.
        code: i32,
        /// The build log, never empty.
        log: String,
    },

    /// Error from the underlying native API, e.g. a memory allocation failure.
    #[error("{backend} Error ({code}): {message}")]
    Backend {
        /// The framework the error originates from.
        backend: &'static str,
        /// The native error code.
        code: i32,
        /// Human readable description.
        message: String,
    },

    /// A host slice doesn't match the size of a device buffer.
    #[error("Size mismatch: buffer holds {expected} elements, host data has {actual}.")]
    SizeMismatch {
        /// Number of elements of the device buffer.
        expected: usize,
        /// Number of elements of the host data.
        actual: usize,
    },

    /// The device result differs from the host reference.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Error when a kernel with the given name cannot be found.
    #[error("Kernel with name {0} not found!")]
    KernelNotFound(String),

    /// Error when the device is from an unsupported vendor.
    #[error("Vendor {0} is not supported.")]
    UnsupportedVendor(String),

    /// Error when the string representation of a unique identifier (PCI-ID or UUID) cannot be
    /// parsed.
    #[error("{0}")]
    InvalidId(String),

    /// Error when an argument, e.g. a device type filter, cannot be parsed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Error when standard I/O fails.
    #[error("IO Error: {0}")]
    IO(#[from] std::io::Error),

    /// Errors that rarely happen and don't deserve their own error type.
    #[error("{0}")]
    Generic(String),
}

impl GPUError {
    /// Returns the process exit status for this error.
    ///
    /// Errors from a native API exit with the native (non-zero) error code, everything else with
    /// [`EXIT_FAILURE`].
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Backend { code, .. } | Self::BuildError { code, .. } if *code != 0 => *code,
            _ => EXIT_FAILURE,
        }
    }
}

/// Convenience type alias for [`GPUError`] based [`Result`]s.
#[allow(clippy::upper_case_acronyms)]
pub type GPUResult<T> = std::result::Result<T, GPUError>;

#[cfg(feature = "opencl")]
impl From<ClError> for GPUError {
    fn from(error: ClError) -> Self {
        GPUError::Backend {
            backend: "OpenCL",
            code: error.0,
            message: error.to_string(),
        }
    }
}

#[cfg(feature = "cuda")]
impl From<CudaError> for GPUError {
    fn from(error: CudaError) -> Self {
        GPUError::Backend {
            backend: "CUDA",
            code: error as i32,
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{GPUError, ValidationError, EXIT_FAILURE};

    #[test]
    fn test_exit_code() {
        let backend = GPUError::Backend {
            backend: "Host",
            code: -52,
            message: "invalid kernel arguments".to_string(),
        };
        assert_eq!(backend.exit_code(), -52);

        let build = GPUError::BuildError {
            device: "cpu".to_string(),
            code: -11,
            log: "error".to_string(),
        };
        assert_eq!(build.exit_code(), -11);

        assert_eq!(GPUError::NoDeviceFound.exit_code(), EXIT_FAILURE);
        assert_eq!(
            GPUError::SizeMismatch {
                expected: 1,
                actual: 2
            }
            .exit_code(),
            EXIT_FAILURE
        );
    }

    #[test]
    fn test_validation_error_display() {
        let mismatch = ValidationError {
            index: 3,
            expected: Some(1.5),
            actual: Some(2.0),
        };
        assert_eq!(
            mismatch.to_string(),
            "first mismatch at index 3: expected 1.5, got 2"
        );

        let truncated = ValidationError {
            index: 7,
            expected: Some(1.0),
            actual: None,
        };
        assert_eq!(truncated.to_string(), "result lengths differ at index 7");
    }
}
