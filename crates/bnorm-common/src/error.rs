//! Error types for bnorm
//!
//! Errors are layered: [`BnormError`] is the workspace-wide error, wrapping
//! the descriptor errors raised while building tensors ([`TensorError`]), the
//! configuration-time validation errors ([`ValidationError`]), and dispatch
//! configuration errors ([`ConfigError`]).

use crate::config::ConfigError;
use crate::types::DataType;
use thiserror::Error;

/// Result type alias for bnorm operations.
pub type Result<T> = std::result::Result<T, BnormError>;

/// Main error type for bnorm.
#[derive(Error, Debug)]
pub enum BnormError {
    #[error("Tensor error: {0}")]
    Tensor(#[from] TensorError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl BnormError {
    /// The validation error kind, when this error came from the validator.
    pub fn validation_kind(&self) -> Option<ValidationErrorKind> {
        match self {
            Self::Validation(e) => Some(e.kind()),
            _ => None,
        }
    }
}

/// Errors raised while building a tensor descriptor or binding storage to it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TensorError {
    #[error("Tensor shape must have at least one dimension")]
    EmptyShape,

    #[error("Dimension {dim} has size zero")]
    ZeroDimension { dim: usize },

    #[error("Stride count {strides} does not match rank {rank}")]
    StrideRankMismatch { rank: usize, strides: usize },

    #[error("Strides {strides:?} overlap for shape {shape:?}")]
    OverlappingStrides { shape: Vec<usize>, strides: Vec<usize> },

    #[error("Storage holds {actual} elements but data type {dtype} needs {expected}")]
    StorageMismatch { dtype: DataType, expected: &'static str, actual: &'static str },

    #[error("Buffer too small: view addresses {required} elements, storage holds {actual}")]
    BufferTooSmall { required: usize, actual: usize },

    #[error("Invalid fixed point position {position} for {dtype}")]
    InvalidFixedPointPosition { dtype: DataType, position: u8 },
}

/// Errors raised by the batch normalization validator at configuration time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Shape mismatch for {tensor}: expected {expected}, got {actual}")]
    ShapeMismatch { tensor: &'static str, expected: String, actual: String },

    #[error("Data type mismatch for {tensor}: expected {expected}, got {actual}")]
    DatatypeMismatch { tensor: &'static str, expected: String, actual: String },

    #[error("Unsupported data type: {dtype}")]
    UnsupportedDatatype { dtype: DataType },

    #[error("Epsilon must be finite and non-negative, got {value}")]
    InvalidEpsilon { value: f32 },

    #[error("Output tensor shares storage with the input; use in-place mode instead")]
    AliasedOutput,
}

/// Discriminant of a [`ValidationError`], convenient for matching in callers
/// and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationErrorKind {
    ShapeMismatch,
    DatatypeMismatch,
    UnsupportedDatatype,
    InvalidEpsilon,
    AliasedOutput,
}

impl ValidationError {
    pub fn kind(&self) -> ValidationErrorKind {
        match self {
            Self::ShapeMismatch { .. } => ValidationErrorKind::ShapeMismatch,
            Self::DatatypeMismatch { .. } => ValidationErrorKind::DatatypeMismatch,
            Self::UnsupportedDatatype { .. } => ValidationErrorKind::UnsupportedDatatype,
            Self::InvalidEpsilon { .. } => ValidationErrorKind::InvalidEpsilon,
            Self::AliasedOutput => ValidationErrorKind::AliasedOutput,
        }
    }
}
