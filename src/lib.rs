//! Batch Downloader Library
//!
//! Downloads a batch of files with bounded concurrency, skipping files whose
//! local copy already matches, verifying downloads against expected
//! checksums and retrying on mismatch.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`session`] - Session state machine, task queue and admission
//! - [`transfer`] - Single-file transfer abstraction and the HTTP implementation
//! - [`verify`] - Streaming digests and checksum sidecar files
//! - [`progress`] - Two-phase byte accounting and throttled reporting
//! - [`events`] - Session event fan-out to subscribers
//! - [`config`] - Session tunables

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod events;
pub mod progress;
pub mod session;
pub mod transfer;
pub mod verify;

// Re-export commonly used types
pub use config::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DownloaderConfig, MAX_CONCURRENCY, MIN_CONCURRENCY,
};
pub use events::{EventKind, EventStream, SessionEvent, TaskFailure};
pub use progress::{ProgressSnapshot, SessionStats};
pub use session::{Downloader, SessionError, SessionState, TaskId};
pub use transfer::{
    HttpTransferFactory, Transfer, TransferError, TransferEvent, TransferEvents, TransferFactory,
    TransferRequest, TransferStats,
};
pub use verify::{ChecksumAlgorithm, VerifyError};
