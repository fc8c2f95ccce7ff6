//! Error types for anchordet.

use thiserror::Error;

/// Result alias for anchordet operations.
pub type DetectResult<T> = std::result::Result<T, DetectError>;

/// Errors that can occur when running the detection core.
#[derive(Debug, Error, PartialEq)]
pub enum DetectError {
    /// A box violates the corner ordering invariant or has non-finite
    /// coordinates.
    #[error("invalid box geometry: ({x1}, {y1}, {x2}, {y2})")]
    InvalidGeometry { x1: f32, y1: f32, x2: f32, y2: f32 },
    /// A configuration value is out of its valid range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// An anchor set and a raw network output disagree on element count.
    ///
    /// This is a wiring error on the caller's side, detected at setup
    /// rather than per element.
    #[error("shape mismatch for {context}: expected {expected}, got {got}")]
    ShapeMismatch {
        expected: usize,
        got: usize,
        context: &'static str,
    },
    /// Two paired slices have inconsistent lengths.
    #[error("length mismatch for {context}: {left} vs {right}")]
    LengthMismatch {
        left: usize,
        right: usize,
        context: &'static str,
    },
}
