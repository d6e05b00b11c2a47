//! Error type shared by every kernel component.

/// Errors raised by the fluid kernel.
///
/// Runtime failures abort the operation that raised them; no partially
/// written buffer is ever considered valid.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KernelError {
    /// Two buffers that must be paired have different lengths.
    #[error("buffer size mismatch for {what}: expected {expected}, got {actual}")]
    SizeMismatch {
        /// Which pairing was violated.
        what: &'static str,
        /// Length of the reference buffer.
        expected: usize,
        /// Length of the offending buffer.
        actual: usize,
    },

    /// A configuration value is NaN or infinite.
    #[error("non-finite value in setting `{field}`")]
    NonFinite {
        /// Name of the offending field.
        field: &'static str,
    },

    /// No usable GPU adapter or device.
    #[error("GPU initialization failed: {0}")]
    GpuInit(String),

    /// Mapping a staging buffer for read-back failed.
    #[error("GPU read-back failed: {0}")]
    Readback(String),
}

impl KernelError {
    /// Build a [`KernelError::SizeMismatch`] unless the lengths agree.
    pub fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<(), Self> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::SizeMismatch { what, expected, actual })
        }
    }
}
