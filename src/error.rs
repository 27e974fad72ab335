//! Error types for proxima.

use thiserror::Error;

/// Errors that can occur during index and quantizer operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IndexError {
    /// The index (or quantizer) must be trained before this operation.
    #[error("index is not trained")]
    NotTrained,

    /// Input dimensionality does not match the index.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// The index cannot accept more vectors.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// The operation is not supported by this index kind.
    #[error("unsupported operation: {0}")]
    UnsupportedOp(&'static str),

    /// Invalid parameter value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A non-finite value was produced during training.
    #[error("numerical failure: {0}")]
    NumericalFailure(String),

    /// A scratch buffer or allocation exceeded available resources.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl IndexError {
    /// Short fixed identifier for the error kind, stable across messages.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            IndexError::NotTrained => "not_trained",
            IndexError::DimensionMismatch { .. } => "dimension_mismatch",
            IndexError::CapacityExceeded(_) => "capacity_exceeded",
            IndexError::UnsupportedOp(_) => "unsupported_op",
            IndexError::InvalidArgument(_) => "invalid_argument",
            IndexError::NumericalFailure(_) => "numerical_failure",
            IndexError::ResourceExhausted(_) => "resource_exhausted",
        }
    }
}

/// Result type alias for proxima operations.
pub type Result<T> = std::result::Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(IndexError::NotTrained.code(), "not_trained");
        assert_eq!(
            IndexError::DimensionMismatch { expected: 4, got: 3 }.code(),
            "dimension_mismatch"
        );
        assert_eq!(IndexError::UnsupportedOp("remove_ids").code(), "unsupported_op");
    }

    #[test]
    fn messages_are_human_readable() {
        let e = IndexError::DimensionMismatch { expected: 8, got: 16 };
        assert_eq!(e.to_string(), "dimension mismatch: expected 8, got 16");
    }
}
