//! Download session orchestration.
//!
//! A session owns an ordered queue of file tasks and moves them through a
//! bounded set of concurrent transfers. Before downloading, each task checks
//! whether its destination already holds the expected content (via the
//! checksum sidecar or a fresh digest) and skips the network when it does.
//! After downloading, the content is verified and re-downloaded on mismatch
//! up to `max_retries` times.
//!
//! # Concurrency Model
//!
//! - A single actor task owns every task, the queue and the counters
//! - [`Downloader`] forwards lifecycle calls as commands with oneshot replies
//! - Transfers and digest jobs report back through an unbounded notice channel
//! - Task ids are never reused, so reports from cleaned sessions are dropped
//!
//! # State Machine
//!
//! See [`SessionState`]. Files can only be added in stand-by; `stop()` waits
//! for every in-flight transfer to acknowledge before emitting `Stop`.

mod actor;
mod destination;
mod downloader;
mod error;
mod pipeline;
mod state;
mod task;

pub use downloader::Downloader;
pub use error::SessionError;
pub use state::SessionState;
pub use task::TaskId;
