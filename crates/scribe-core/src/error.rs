//! Error types for the Scribe transcription pipeline.

use thiserror::Error;

/// Result type alias for pipeline operations
pub type ScribeResult<T> = Result<T, ScribeError>;

/// Errors that can occur in the transcription pipeline
#[derive(Error, Debug)]
pub enum ScribeError {
    #[error("Invalid segmentation policy: {0}")]
    InvalidPolicy(String),

    #[error("Recognition failed: {0}")]
    Recognition(String),

    #[error("Staging store error: {0}")]
    Staging(String),

    #[error("Incomplete results: no transcript for chunk {0}")]
    IncompleteResults(usize),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
