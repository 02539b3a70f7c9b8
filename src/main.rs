//! CLI entry point for the batch downloader.

use std::io::{self, IsTerminal};

use anyhow::{Result, bail};
use batch_downloader::{Downloader, EventStream, SessionEvent, SessionStats};
use clap::Parser;
use tracing::{debug, info, warn};

mod cli;
mod progress_ui;

use cli::Args;
use progress_ui::SessionBar;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let config = args.session_config()?;
    let entries = args.file_entries()?;
    if entries.is_empty() {
        info!("No input provided. Pass URLs as arguments or use --manifest.");
        info!("Example: batch-downloader -o downloads https://example.com/file.bin");
        return Ok(());
    }

    let downloader = Downloader::new(config)?;
    for entry in &entries {
        let dest_dir = entry.dir.as_deref().unwrap_or(&args.output_dir);
        downloader
            .add_file(
                &entry.url,
                dest_dir,
                entry.name.as_deref(),
                entry.checksum.as_deref(),
            )
            .await?;
    }
    info!(
        files = entries.len(),
        concurrency = downloader.config().concurrency,
        "Starting downloads"
    );

    let mut events = downloader.subscribe();
    let use_bar = !args.no_progress && !args.quiet && io::stderr().is_terminal();
    let bar = SessionBar::new(use_bar, entries.len());

    if let Err(e) = downloader.start(args.force).await {
        bar.finish();
        return Err(e.into());
    }

    let outcome = drive(&downloader, &mut events, &bar).await;
    bar.finish();

    match outcome {
        Outcome::Completed(stats) => {
            info!(files = stats.files_completed, "All files up to date");
            Ok(())
        }
        Outcome::Failed { failures } => bail!("{failures} file(s) failed"),
        Outcome::Interrupted => bail!("interrupted"),
    }
}

enum Outcome {
    Completed(SessionStats),
    Failed { failures: usize },
    Interrupted,
}

/// Consumes session events until the session ends or stops.
async fn drive(downloader: &Downloader, events: &mut EventStream, bar: &SessionBar) -> Outcome {
    let mut failures = 0usize;
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::Progress(snapshot)) => bar.update(&snapshot.stats),
                Some(SessionEvent::Error(failure)) => {
                    failures += 1;
                    warn!(url = failure.url().unwrap_or("-"), error = %failure, "File failed");
                }
                Some(SessionEvent::End(stats)) => {
                    bar.update(&stats);
                    if stats.files_failed > 0 {
                        return Outcome::Failed {
                            failures: stats.files_failed,
                        };
                    }
                    return Outcome::Completed(stats);
                }
                Some(SessionEvent::Stop) | None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                if interrupted {
                    break;
                }
                interrupted = true;
                warn!("Interrupt received, stopping downloads");
                if let Err(e) = downloader.stop().await {
                    debug!(error = %e, "Stop request ignored");
                }
            }
        }
    }

    if interrupted {
        Outcome::Interrupted
    } else {
        Outcome::Failed {
            failures: failures.max(1),
        }
    }
}
