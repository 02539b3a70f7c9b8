//! The wire-level transfer collaborator.
//!
//! A [`Transfer`] moves one remote file to one local path. The session never
//! looks inside it: it probes the size, drives start/pause/resume/stop, and
//! reacts to the [`TransferEvent`]s the transfer reports through its
//! [`TransferEvents`] sink. [`HttpTransfer`] is the default implementation.

mod error;
mod http;

pub use error::TransferError;
pub use http::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, HttpTransfer, HttpTransferFactory};

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

/// Byte counters of a single transfer attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Bytes written in the current attempt.
    pub downloaded: u64,
    /// Remote size, once known.
    pub total: Option<u64>,
}

/// What a transfer reports back to its owner.
#[derive(Debug)]
pub enum TransferEvent {
    /// Cumulative counters of the current attempt.
    Progress(TransferStats),
    /// Every byte was written to `path`.
    Completed { path: PathBuf },
    /// Acknowledges a `stop()`; partial output has been removed.
    Stopped,
    /// The attempt failed and will not continue on its own.
    Failed(TransferError),
}

/// Callback sink handed to a transfer at creation.
#[derive(Clone)]
pub struct TransferEvents {
    sink: Arc<dyn Fn(TransferEvent) + Send + Sync>,
}

impl fmt::Debug for TransferEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferEvents").finish_non_exhaustive()
    }
}

impl TransferEvents {
    pub fn new(sink: impl Fn(TransferEvent) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn emit(&self, event: TransferEvent) {
        (self.sink)(event);
    }

    pub fn progress(&self, stats: TransferStats) {
        self.emit(TransferEvent::Progress(stats));
    }

    pub fn completed(&self, path: PathBuf) {
        self.emit(TransferEvent::Completed { path });
    }

    pub fn stopped(&self) {
        self.emit(TransferEvent::Stopped);
    }

    pub fn failed(&self, error: TransferError) {
        self.emit(TransferEvent::Failed(error));
    }
}

/// Where a transfer reads from and writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub url: String,
    pub destination: PathBuf,
}

/// One remote-file transfer.
///
/// `start`, `pause`, `resume` and `stop` only signal; outcomes arrive later as
/// [`TransferEvent`]s. `start` after a finished attempt begins a new attempt
/// from scratch. Every `stop` is eventually answered by either
/// [`TransferEvent::Stopped`] or, if the attempt was already finishing,
/// [`TransferEvent::Completed`].
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Remote size in bytes.
    ///
    /// # Errors
    ///
    /// Fails when the size cannot be determined.
    async fn total_size(&self) -> Result<u64, TransferError>;

    fn start(&self);

    fn pause(&self);

    fn resume(&self);

    fn stop(&self);

    fn stats(&self) -> TransferStats;
}

/// Creates transfers for a session.
pub trait TransferFactory: Send + Sync {
    fn create(&self, request: TransferRequest, events: TransferEvents) -> Box<dyn Transfer>;
}
