// src/error.rs
use thiserror::Error;
use trellis_core::{BuildError, ProcessingError};

/// Top-level error for building a processor and dispatching requests.
#[derive(Error, Debug)]
pub enum TrellisError {
    #[error("Sitemap build failed: {0}")]
    Build(#[from] BuildError),

    #[error("Processing failed: {0}")]
    Processing(#[from] ProcessingError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
