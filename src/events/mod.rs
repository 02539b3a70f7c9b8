//! Typed session notifications.
//!
//! The session publishes [`SessionEvent`]s to every subscriber. Each
//! subscriber owns an unbounded receiver, so a slow observer never blocks
//! the orchestrator; a dropped [`EventStream`] is pruned on the next emit.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::progress::{ProgressSnapshot, SessionStats};

/// Per-task failure reported through [`SessionEvent::Error`].
///
/// Messages are carried as strings so the event can be cloned to every
/// subscriber.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskFailure {
    /// Downloaded content kept mismatching after every retry.
    #[error("checksum mismatch for {url} ({path}): expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// The transfer engine failed; the session stops.
    #[error("transfer failed for {url}: {message}")]
    Transfer { url: String, message: String },

    /// Hashing or sidecar I/O failed for this task.
    #[error("IO error on {path}: {message}")]
    Io { path: PathBuf, message: String },
}

impl TaskFailure {
    /// URL of the task, when the failure names one.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::ChecksumMismatch { url, .. } | Self::Transfer { url, .. } => Some(url),
            Self::Io { .. } => None,
        }
    }
}

/// Notification emitted by a download session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Throttled aggregate progress.
    Progress(ProgressSnapshot),
    /// A task failed; see [`TaskFailure`].
    Error(TaskFailure),
    /// Progress reached 100% with every file completed or failed. Emitted
    /// exactly once per started session.
    End(SessionStats),
    /// The session finished stopping and was cleaned.
    Stop,
}

impl SessionEvent {
    /// Kind discriminant, handy for filtering.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Progress(_) => EventKind::Progress,
            Self::Error(_) => EventKind::Error,
            Self::End(_) => EventKind::End,
            Self::Stop => EventKind::Stop,
        }
    }
}

/// Event kinds, without payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Progress,
    Error,
    End,
    Stop,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Progress => "progress",
            Self::Error => "error",
            Self::End => "end",
            Self::Stop => "stop",
        };
        f.write_str(name)
    }
}

/// Fan-out publisher shared between the session handle and its actor.
#[derive(Clone, Default)]
pub struct EventChannel {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>>,
}

impl fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new observer. Only events emitted afterwards are seen.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        EventStream { rx }
    }

    /// Delivers `event` to every live subscriber.
    pub fn emit(&self, event: &SessionEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Receiving end of a subscription.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl EventStream {
    /// Waits for the next event. Returns `None` once the session is gone.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Returns an already-delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }
}
