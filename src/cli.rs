//! CLI argument definitions using clap derive macros.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use batch_downloader::DownloaderConfig;

/// Download a batch of files, skipping those already up to date.
///
/// Files with an expected checksum are verified after download and fetched
/// again on mismatch. Verified digests are kept next to each file
/// (`<file>.<algorithm>`) so later runs skip unchanged files without
/// re-hashing them.
#[derive(Parser, Debug)]
#[command(name = "batch-downloader")]
#[command(author, version, about)]
pub struct Args {
    /// URLs to download into the output directory
    pub urls: Vec<String>,

    /// JSON manifest: [{"url": "...", "dir": "...", "name": "...", "checksum": "..."}]
    #[arg(short = 'm', long)]
    pub manifest: Option<PathBuf>,

    /// JSON session config (concurrency, max_retries, algorithm, progress_interval_ms)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory for files that do not name their own
    #[arg(short = 'o', long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Maximum concurrent downloads (1-100)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Re-downloads allowed after a checksum mismatch (0-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: Option<u8>,

    /// Checksum algorithm: sha256, sha512, sha1 or md5
    #[arg(short = 'a', long)]
    pub algorithm: Option<String>,

    /// Download every file again without checking local copies
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

/// One file to fetch, from the command line or a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileEntry {
    pub url: String,
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
}

impl Args {
    /// Builds the session config: config file first, then CLI overrides.
    pub fn session_config(&self) -> Result<DownloaderConfig> {
        let mut config = match &self.config {
            Some(path) => DownloaderConfig::from_json_file(path)?,
            None => DownloaderConfig::default(),
        };
        if let Some(concurrency) = self.concurrency {
            config.concurrency = usize::from(concurrency);
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = u32::from(max_retries);
        }
        if let Some(algorithm) = &self.algorithm {
            config = config.with_algorithm_name(algorithm)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Positional URLs followed by manifest entries.
    pub fn file_entries(&self) -> Result<Vec<FileEntry>> {
        let mut entries: Vec<FileEntry> = self
            .urls
            .iter()
            .map(|url| FileEntry {
                url: url.clone(),
                dir: None,
                name: None,
                checksum: None,
            })
            .collect();
        if let Some(path) = &self.manifest {
            entries.extend(load_manifest(path)?);
        }
        Ok(entries)
    }
}

/// Reads a JSON manifest of files.
pub fn load_manifest(path: &Path) -> Result<Vec<FileEntry>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("invalid manifest {}", path.display()))
}
