//! Error types for stem-io

use std::io;

/// Result type for stem-io operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading or mutating a container
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid file format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// The in-memory box tree no longer matches the file
    #[error("Structural mismatch: {0}")]
    StructuralMismatch(String),
}
