//! Error types for session operations.

use std::path::PathBuf;

use thiserror::Error;

use super::SessionState;
use crate::transfer::TransferError;
use crate::verify::ChecksumAlgorithm;

/// Errors returned synchronously by [`Downloader`](super::Downloader) calls.
///
/// Per-task failures during a running session are not errors of this type;
/// they arrive as [`SessionEvent::Error`](crate::SessionEvent::Error).
#[derive(Debug, Error)]
pub enum SessionError {
    /// The operation is not allowed in the current session state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// The state the session was in.
        state: SessionState,
    },

    /// A remote size could not be determined at start.
    #[error("failed to determine size of {url}: {source}")]
    SizeProbe {
        /// The URL whose size probe failed.
        url: String,
        /// The underlying transfer error.
        #[source]
        source: TransferError,
    },

    /// The URL could not be parsed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The destination path is not acceptable.
    #[error("invalid destination {path}: {reason}")]
    InvalidDestination {
        /// The rejected path (directory joined with file name).
        path: PathBuf,
        /// Why it was rejected.
        reason: String,
    },

    /// Another task of this session already writes to the destination.
    #[error("destination already used by another file: {path}")]
    DuplicateDestination {
        /// The contested destination.
        path: PathBuf,
    },

    /// An expected checksum is not a hex digest of the configured algorithm.
    #[error("invalid {algorithm} checksum for {url}: {checksum:?}")]
    InvalidChecksum {
        /// The file the checksum was given for.
        url: String,
        /// The rejected checksum.
        checksum: String,
        /// The configured algorithm.
        algorithm: ChecksumAlgorithm,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// The requested checksum algorithm is not supported.
    #[error("unsupported checksum algorithm: {name}")]
    UnknownAlgorithm {
        /// The algorithm name that was requested.
        name: String,
    },

    /// The session task is gone (the runtime shut down).
    #[error("download session is closed")]
    SessionClosed,

    /// A downloader was created outside a Tokio runtime.
    #[error("no Tokio runtime available to drive the download session")]
    NoRuntime,
}

impl SessionError {
    /// Creates an invalid-state error.
    pub fn invalid_state(operation: &'static str, state: SessionState) -> Self {
        Self::InvalidState { operation, state }
    }

    /// Creates a size-probe error.
    pub fn size_probe(url: impl Into<String>, source: TransferError) -> Self {
        Self::SizeProbe {
            url: url.into(),
            source,
        }
    }

    /// Creates an invalid-destination error.
    pub fn invalid_destination(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidDestination {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid-configuration error.
    pub fn invalid_config(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            message: message.into(),
        }
    }
}
