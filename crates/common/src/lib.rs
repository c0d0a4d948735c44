/// Common types and utilities for the caption decoder crates
pub mod tensor;

use std::fmt::Debug;
use thiserror::Error;

/// Decoder errors
#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Shape mismatch in {context}: expected {expected}, got {actual}")]
    Shape {
        context: String,
        expected: String,
        actual: String,
    },

    #[error("Token id {token} out of range (vocabulary size: {vocab_size})")]
    InvalidToken { token: usize, vocab_size: usize },

    #[error("Array error: {0}")]
    Array(#[from] ndarray::ShapeError),
}

impl DecoderError {
    /// Build a shape error from anything debug-printable (usually dimension tuples)
    pub fn shape(context: impl Into<String>, expected: impl Debug, actual: impl Debug) -> Self {
        DecoderError::Shape {
            context: context.into(),
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        }
    }
}

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, DecoderError>;
