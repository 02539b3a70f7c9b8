//! Per-file task state owned by the session actor.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::transfer::Transfer;

/// Identifier of a task, unique for the lifetime of a `Downloader`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a task is in its lifecycle.
///
/// ```text
/// Queued -> SizeProbed -> Checking -> Downloading -> Verifying -> Completed
///                            |            ^    |         |
///                            +--> Ready --+    |         +-> Ready/Downloading (retry)
///                                              +-> Failed / Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskPhase {
    Queued,
    SizeProbed,
    /// Digesting an existing destination to decide staleness.
    Checking,
    /// Prepared for download while the session was paused.
    Ready,
    Downloading,
    /// Digesting a finished download.
    Verifying,
    Completed,
    Failed,
    Stopped,
}

/// One file fetch.
///
/// Byte credits track what this task has contributed to the session
/// counters in the current download attempt and verification pass. They
/// never exceed `file_size`, and finishing an attempt or pass tops them up to
/// exactly `file_size`.
pub(crate) struct Task {
    pub(crate) id: TaskId,
    pub(crate) url: String,
    pub(crate) destination: PathBuf,
    pub(crate) expected_checksum: Option<String>,
    pub(crate) file_size: u64,
    pub(crate) retry_count: u32,
    pub(crate) phase: TaskPhase,
    pub(crate) transfer: Box<dyn Transfer>,
    download_credit: u64,
    verify_credit: u64,
    hash_abort: Option<Arc<AtomicBool>>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("destination", &self.destination)
            .field("file_size", &self.file_size)
            .field("retry_count", &self.retry_count)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        url: String,
        destination: PathBuf,
        expected_checksum: Option<String>,
        transfer: Box<dyn Transfer>,
    ) -> Self {
        Self {
            id,
            url,
            destination,
            expected_checksum,
            file_size: 0,
            retry_count: 0,
            phase: TaskPhase::Queued,
            transfer,
            download_credit: 0,
            verify_credit: 0,
            hash_abort: None,
        }
    }

    /// Resets per-session fields so the task can be probed again.
    pub(crate) fn rewind(&mut self) {
        self.file_size = 0;
        self.retry_count = 0;
        self.phase = TaskPhase::Queued;
        self.download_credit = 0;
        self.verify_credit = 0;
        self.hash_abort = None;
    }

    /// Clears credits for a fresh download attempt.
    pub(crate) fn begin_attempt(&mut self) {
        self.download_credit = 0;
        self.verify_credit = 0;
    }

    /// Clears the verification credit for a fresh digest pass.
    pub(crate) fn begin_verify_pass(&mut self) {
        self.verify_credit = 0;
    }

    /// Raises the download credit to `downloaded` (capped), returning the delta.
    pub(crate) fn advance_download(&mut self, downloaded: u64) -> u64 {
        let target = downloaded.min(self.file_size);
        let delta = target.saturating_sub(self.download_credit);
        self.download_credit += delta;
        delta
    }

    /// Raises the verification credit to `verified` (capped), returning the delta.
    pub(crate) fn advance_verify(&mut self, verified: u64) -> u64 {
        let target = verified.min(self.file_size);
        let delta = target.saturating_sub(self.verify_credit);
        self.verify_credit += delta;
        delta
    }

    pub(crate) fn add_verified(&mut self, bytes: u64) -> u64 {
        self.advance_verify(self.verify_credit.saturating_add(bytes))
    }

    pub(crate) fn finish_download(&mut self) -> u64 {
        self.advance_download(self.file_size)
    }

    pub(crate) fn finish_verify(&mut self) -> u64 {
        self.advance_verify(self.file_size)
    }

    /// Installs a fresh abort flag for a digest job and returns it.
    pub(crate) fn arm_hash(&mut self) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        self.hash_abort = Some(Arc::clone(&flag));
        flag
    }

    /// Signals a running digest job, if any, to give up.
    pub(crate) fn abort_hash(&mut self) {
        if let Some(flag) = self.hash_abort.take() {
            flag.store(true, Ordering::SeqCst);
        }
    }

    pub(crate) fn is_hashing(&self) -> bool {
        matches!(self.phase, TaskPhase::Checking | TaskPhase::Verifying)
    }

    pub(crate) fn checksum_matches(&self, actual: &str) -> bool {
        self.expected_checksum
            .as_deref()
            .is_some_and(|expected| crate::verify::checksum_matches(expected, actual))
    }
}
