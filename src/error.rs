//! Structured error handling for the data-preparation pipeline
//!
//! Configuration problems are caught at dataset construction; per-example
//! problems propagate out of the `load` call for the offending item.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias with DataError
pub type Result<T> = std::result::Result<T, DataError>;

/// Main error type for dataset preparation
#[derive(Error, Debug)]
pub enum DataError {
    /// Configuration validation errors (surface before any example is loaded)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Corpus filelist parsing errors
    #[error("Corpus error in {file:?} line {line}: {message}")]
    Corpus {
        file: PathBuf,
        line: usize,
        message: String,
    },

    /// Audio loading / decoding errors
    #[error("Audio error for {path:?}: {message}")]
    Audio { path: PathBuf, message: String },

    /// Sample rate of a loaded waveform does not match the configured target
    #[error("Sample rate mismatch for {path:?}: got {got} Hz, expected {expected} Hz")]
    SampleRateMismatch {
        path: PathBuf,
        got: u32,
        expected: u32,
    },

    /// Cross-feature shape consistency violations
    #[error("Shape mismatch in {context}: {message}")]
    Shape { context: String, message: String },

    /// Text encoding errors
    #[error("Text encoding error: {message}")]
    Text { message: String },

    /// Cached tensor file errors
    #[error("Tensor cache error for {path:?}: {message}")]
    TensorCache { path: PathBuf, message: String },

    /// Errors from the candle tensor backend
    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DataError {
    /// Build a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Build a shape consistency error
    pub fn shape(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Shape {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Build an audio error
    pub fn audio(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Audio {
            path: path.into(),
            message: message.into(),
        }
    }
}
