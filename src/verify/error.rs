//! Error types for checksum verification.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while hashing files or handling checksum sidecars.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// File system error while reading the file or reading/writing its sidecar.
    #[error("IO error verifying {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The requested digest algorithm is not supported.
    #[error("unsupported checksum algorithm: {name}")]
    UnknownAlgorithm {
        /// The algorithm name that was requested.
        name: String,
    },
}

impl VerifyError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an unknown-algorithm error.
    pub fn unknown_algorithm(name: impl Into<String>) -> Self {
        Self::UnknownAlgorithm { name: name.into() }
    }
}
