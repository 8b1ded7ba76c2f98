//! Error types for pulldown detection and field reconstruction.
//!
//! Most failures here are ordinary backpressure rather than faults: an
//! exhausted buffer pool or a frame that has not been released yet. Callers
//! are expected to match on them and retry once resources are returned.

use crate::pool::Parity;
use thiserror::Error;

/// Error type for pullup operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PullupError {
    /// Configuration rejected at context creation.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Frame format without metric kernels.
    #[error("Unsupported frame format: {format}")]
    UnsupportedFormat { format: String },

    /// No buffer in the pool can satisfy the request.
    #[error("Buffer pool exhausted ({buffers} buffers in use)")]
    PoolExhausted { buffers: usize },

    /// The previous frame has not been released.
    #[error("Previous frame is still outstanding")]
    FrameOutstanding,

    /// Two fields of the same parity were submitted back to back.
    #[error("Repeated {parity} field submitted; field dropped")]
    RepeatedParity { parity: Parity },

    /// A lock handed out by another context's pool.
    #[error("Buffer lock belongs to another pool")]
    ForeignLock,

    /// Caller-provided plane data does not match the configured geometry.
    #[error("Plane {plane} mismatch: need {needed} bytes, have {available}")]
    PlaneMismatch {
        plane: usize,
        needed: usize,
        available: usize,
    },
}

/// Result type for pullup operations.
pub type Result<T> = std::result::Result<T, PullupError>;

impl PullupError {
    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an unsupported format error.
    pub fn unsupported_format(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    /// Create a pool exhausted error.
    pub fn pool_exhausted(buffers: usize) -> Self {
        Self::PoolExhausted { buffers }
    }

    /// Create a repeated parity error.
    pub fn repeated_parity(parity: Parity) -> Self {
        Self::RepeatedParity { parity }
    }

    /// Create a plane mismatch error.
    pub fn plane_mismatch(plane: usize, needed: usize, available: usize) -> Self {
        Self::PlaneMismatch {
            plane,
            needed,
            available,
        }
    }

    /// Whether the error is transient backpressure the caller can retry.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. } | Self::FrameOutstanding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PullupError::pool_exhausted(10);
        assert!(err.to_string().contains("10 buffers"));

        let err = PullupError::unsupported_format("yuy2");
        assert!(err.to_string().contains("yuy2"));

        let err = PullupError::repeated_parity(Parity::Bottom);
        assert!(err.to_string().contains("bottom"));

        let err = PullupError::ForeignLock;
        assert!(err.to_string().contains("another"));

        let err = PullupError::plane_mismatch(1, 100, 50);
        assert!(err.to_string().contains("need 100"));
        assert!(err.to_string().contains("have 50"));
    }

    #[test]
    fn test_backpressure_classification() {
        assert!(PullupError::pool_exhausted(10).is_backpressure());
        assert!(PullupError::FrameOutstanding.is_backpressure());
        assert!(!PullupError::invalid_config("bad").is_backpressure());
        assert!(!PullupError::repeated_parity(Parity::Top).is_backpressure());
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(
            PullupError::plane_mismatch(0, 10, 5),
            PullupError::plane_mismatch(0, 10, 5)
        );
        assert_ne!(
            PullupError::pool_exhausted(10),
            PullupError::pool_exhausted(12)
        );
    }
}
