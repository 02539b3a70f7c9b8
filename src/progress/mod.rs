//! Aggregate progress across download and verification bytes.
//!
//! The [`ProgressAggregator`] owns the session byte counters. Download and
//! verification are weighted equally: the total is the mean of the two phase
//! percentages, so a session whose files all verify from sidecars still moves
//! from 0 to 100.

use std::time::{Duration, Instant};

use crate::transfer::TransferStats;

/// Default minimum delay between throttled progress events.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(1000);

/// Percentage of `done` over `total`.
///
/// Returns 0 for an empty budget and exactly 100 once `done` reaches `total`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else if done >= total {
        100.0
    } else {
        (done as f64 / total as f64) * 100.0
    }
}

/// Point-in-time view of a session, as returned by `Downloader::stats()`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionStats {
    /// Number of files scheduled at `start()`.
    pub total_files: usize,
    /// Files that finished successfully (fast path or verified download).
    pub files_completed: usize,
    /// Files that failed for good (checksum mismatch or local I/O).
    pub files_failed: usize,
    /// Mean of download and verify progress, never decreasing within a session.
    pub total_progress: f64,
    /// Percentage of download bytes credited.
    pub download_progress: f64,
    /// Percentage of verification bytes credited.
    pub verify_progress: f64,
    /// Tasks still waiting in the queue.
    pub queued: usize,
    /// Tasks currently holding a concurrency slot.
    pub in_progress: usize,
}

/// Payload of a `progress` event.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    /// Session-wide percentages and file counts.
    pub stats: SessionStats,
    /// Stats of the transfer that triggered this event, if any.
    pub transfer: Option<TransferStats>,
}

/// Session byte counters and progress throttling.
#[derive(Debug)]
pub struct ProgressAggregator {
    bytes_to_download: u64,
    bytes_downloaded: u64,
    bytes_to_verify: u64,
    bytes_verified: u64,
    files_to_download: usize,
    files_completed: usize,
    files_failed: usize,
    started: bool,
    high_water: f64,
    interval: Duration,
    last_emit: Option<Instant>,
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_INTERVAL)
    }
}

impl ProgressAggregator {
    /// Creates empty counters with the given throttle interval.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            bytes_to_download: 0,
            bytes_downloaded: 0,
            bytes_to_verify: 0,
            bytes_verified: 0,
            files_to_download: 0,
            files_completed: 0,
            files_failed: 0,
            started: false,
            high_water: 0.0,
            interval,
            last_emit: None,
        }
    }

    /// Fixes the session budget after all sizes are known.
    pub fn begin(&mut self, files: usize, total_bytes: u64) {
        self.reset();
        self.started = true;
        self.files_to_download = files;
        self.bytes_to_download = total_bytes;
        self.bytes_to_verify = total_bytes;
    }

    /// Zeroes every counter. The throttle interval is kept.
    pub fn reset(&mut self) {
        *self = Self::new(self.interval);
    }

    pub fn credit_download(&mut self, bytes: u64) {
        self.bytes_downloaded = self.bytes_downloaded.saturating_add(bytes);
    }

    pub fn credit_verify(&mut self, bytes: u64) {
        self.bytes_verified = self.bytes_verified.saturating_add(bytes);
    }

    /// Grows the verification budget (stale file with an expected checksum).
    pub fn extend_verify(&mut self, bytes: u64) {
        self.hold_high_water();
        self.bytes_to_verify = self.bytes_to_verify.saturating_add(bytes);
    }

    /// Grows both budgets by one more attempt of `bytes`.
    pub fn extend_retry(&mut self, bytes: u64) {
        self.hold_high_water();
        self.bytes_to_download = self.bytes_to_download.saturating_add(bytes);
        self.bytes_to_verify = self.bytes_to_verify.saturating_add(bytes);
    }

    fn hold_high_water(&mut self) {
        self.high_water = self.total_progress();
    }

    pub fn file_completed(&mut self) {
        self.files_completed += 1;
    }

    /// Records a file that will never complete. Its byte credits must
    /// already be topped up.
    pub fn file_failed(&mut self) {
        self.files_failed += 1;
    }

    /// Files that completed or failed.
    #[must_use]
    pub fn files_settled(&self) -> usize {
        self.files_completed + self.files_failed
    }

    #[must_use]
    pub fn files_to_download(&self) -> usize {
        self.files_to_download
    }

    #[must_use]
    pub fn files_completed(&self) -> usize {
        self.files_completed
    }

    #[must_use]
    pub fn download_progress(&self) -> f64 {
        percent(self.bytes_downloaded, self.bytes_to_download)
    }

    #[must_use]
    pub fn verify_progress(&self) -> f64 {
        percent(self.bytes_verified, self.bytes_to_verify)
    }

    /// Raw mean of the two phase percentages.
    #[must_use]
    pub fn raw_total_progress(&self) -> f64 {
        f64::midpoint(self.download_progress(), self.verify_progress())
    }

    /// Reported total: the highest raw total observed since `begin()`.
    #[must_use]
    pub fn total_progress(&self) -> f64 {
        self.high_water.max(self.raw_total_progress())
    }

    /// True when both byte budgets are met and every file has settled,
    /// successfully or not.
    ///
    /// Always false before `begin()`.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.started
            && self.files_settled() >= self.files_to_download
            && self.bytes_downloaded >= self.bytes_to_download
            && self.bytes_verified >= self.bytes_to_verify
    }

    /// Builds a stats view; `queued` and `in_progress` come from the scheduler.
    #[must_use]
    pub fn stats(&self, queued: usize, in_progress: usize) -> SessionStats {
        let (total_progress, download_progress, verify_progress) = if self.is_complete() {
            (100.0, 100.0, 100.0)
        } else {
            (
                self.total_progress(),
                self.download_progress(),
                self.verify_progress(),
            )
        };
        SessionStats {
            total_files: self.files_to_download,
            files_completed: self.files_completed,
            files_failed: self.files_failed,
            total_progress,
            download_progress,
            verify_progress,
            queued,
            in_progress,
        }
    }

    /// Decides whether a throttled progress event is due at `now`.
    ///
    /// Completion always emits; otherwise at most one event per interval.
    pub fn should_emit(&mut self, now: Instant) -> bool {
        self.hold_high_water();

        let due = match self.last_emit {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if self.is_complete() || due {
            self.last_emit = Some(now);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_edges() {
        assert_eq!(percent(0, 0), 0.0);
        assert_eq!(percent(5, 0), 0.0);
        assert_eq!(percent(50, 200), 25.0);
        assert_eq!(percent(200, 200), 100.0);
        assert_eq!(percent(300, 200), 100.0);
    }

    #[test]
    fn test_total_is_mean_of_phases() {
        let mut progress = ProgressAggregator::default();
        progress.begin(2, 1000);
        progress.credit_download(500);
        assert_eq!(progress.download_progress(), 50.0);
        assert_eq!(progress.verify_progress(), 0.0);
        assert_eq!(progress.total_progress(), 25.0);

        progress.credit_verify(1000);
        assert_eq!(progress.total_progress(), 75.0);
    }

    #[test]
    fn test_retry_growth_never_lowers_reported_total() {
        let mut progress = ProgressAggregator::new(Duration::ZERO);
        progress.begin(1, 100);
        progress.credit_download(100);
        progress.credit_verify(60);
        let before = progress.total_progress();

        progress.extend_retry(100);
        assert!(progress.raw_total_progress() < before);
        assert_eq!(progress.total_progress(), before);
    }

    #[test]
    fn test_is_complete_requires_files_and_bytes() {
        let mut progress = ProgressAggregator::default();
        progress.begin(1, 10);
        progress.credit_download(10);
        progress.credit_verify(10);
        assert!(!progress.is_complete());

        progress.file_completed();
        assert!(progress.is_complete());
        let stats = progress.stats(0, 0);
        assert_eq!(stats.total_progress, 100.0);
        assert_eq!(stats.files_completed, 1);
    }

    #[test]
    fn test_failed_file_counts_towards_completion() {
        let mut progress = ProgressAggregator::default();
        progress.begin(2, 20);
        progress.credit_download(20);
        progress.credit_verify(20);
        progress.file_completed();
        assert!(!progress.is_complete());

        progress.file_failed();
        assert!(progress.is_complete());
        let stats = progress.stats(0, 0);
        assert_eq!(stats.total_progress, 100.0);
        assert_eq!(stats.files_completed, 1);
        assert_eq!(stats.files_failed, 1);
        assert_eq!(progress.files_settled(), 2);
    }

    #[test]
    fn test_empty_session_is_complete_immediately() {
        let mut progress = ProgressAggregator::default();
        progress.begin(0, 0);
        assert!(progress.is_complete());
        assert_eq!(progress.stats(0, 0).total_progress, 100.0);
    }

    #[test]
    fn test_not_complete_before_begin() {
        let progress = ProgressAggregator::default();
        assert!(!progress.is_complete());
        assert_eq!(progress.stats(0, 0).total_progress, 0.0);
    }

    #[test]
    fn test_throttle_suppresses_until_interval() {
        let mut progress = ProgressAggregator::new(Duration::from_secs(1));
        progress.begin(1, 1000);
        let t0 = Instant::now();

        progress.credit_download(10);
        assert!(progress.should_emit(t0), "first event is always emitted");
        progress.credit_download(10);
        assert!(!progress.should_emit(t0 + Duration::from_millis(200)));
        progress.credit_download(10);
        assert!(progress.should_emit(t0 + Duration::from_millis(1200)));
    }

    #[test]
    fn test_throttle_always_emits_at_hundred() {
        let mut progress = ProgressAggregator::new(Duration::from_secs(60));
        progress.begin(1, 10);
        let t0 = Instant::now();
        assert!(progress.should_emit(t0));

        progress.credit_download(10);
        progress.credit_verify(10);
        progress.file_completed();
        assert!(progress.should_emit(t0 + Duration::from_millis(1)));
    }

    #[test]
    fn test_reset_keeps_interval() {
        let mut progress = ProgressAggregator::new(Duration::from_millis(5));
        progress.begin(3, 300);
        progress.credit_download(300);
        progress.reset();
        assert_eq!(progress.files_to_download(), 0);
        assert_eq!(progress.download_progress(), 0.0);
        assert_eq!(progress.interval, Duration::from_millis(5));
    }
}
