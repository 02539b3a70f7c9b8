//! Progress UI (bar) for download sessions.

use std::time::Duration;

use batch_downloader::SessionStats;
use indicatif::{ProgressBar, ProgressStyle};

/// Bar resolution: one tick per tenth of a percent.
const BAR_LENGTH: u64 = 1000;

/// Terminal progress bar driven by session progress events.
///
/// When disabled every method is a no-op.
pub(crate) struct SessionBar {
    bar: Option<ProgressBar>,
}

impl SessionBar {
    pub(crate) fn new(enabled: bool, total_files: usize) -> Self {
        if !enabled {
            return Self { bar: None };
        }
        let bar = ProgressBar::new(BAR_LENGTH);
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{bar:40}] {percent:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .progress_chars("=> "),
        );
        bar.set_message(format!("[0/{total_files}] checking sizes..."));
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar: Some(bar) }
    }

    pub(crate) fn update(&self, stats: &SessionStats) {
        let Some(bar) = &self.bar else { return };
        bar.set_position(bar_position(stats.total_progress));
        bar.set_message(status_line(stats));
    }

    pub(crate) fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn bar_position(total_progress: f64) -> u64 {
    let clamped = total_progress.clamp(0.0, 100.0);
    (clamped * 10.0).round() as u64
}

fn status_line(stats: &SessionStats) -> String {
    format!(
        "[{}/{}] {} active, {} queued (download {:.0}%, verify {:.0}%)",
        stats.files_completed,
        stats.total_files,
        stats.in_progress,
        stats.queued,
        stats.download_progress,
        stats.verify_progress
    )
}
