//! Session configuration.
//!
//! [`DownloaderConfig`] deserializes from JSON with every field optional:
//!
//! ```json
//! { "concurrency": 2, "max_retries": 5, "algorithm": "sha1", "progress_interval_ms": 500 }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::session::SessionError;
use crate::verify::ChecksumAlgorithm;

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 100;

/// Default number of simultaneous transfers.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default number of re-downloads after a checksum mismatch.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default throttle for progress events, in milliseconds.
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 1000;

/// Tunables of a download session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownloaderConfig {
    /// Maximum number of tasks holding a transfer slot (1-100).
    pub concurrency: usize,
    /// Re-downloads allowed per file after a checksum mismatch.
    pub max_retries: u32,
    /// Digest used for verification and sidecar naming.
    pub algorithm: ChecksumAlgorithm,
    /// Minimum delay between throttled progress events.
    pub progress_interval_ms: u64,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            algorithm: ChecksumAlgorithm::default(),
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
        }
    }
}

impl DownloaderConfig {
    /// Parses a JSON config document and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] for malformed JSON, unknown
    /// fields or out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self, SessionError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SessionError::invalid_config("config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] if the file cannot be read or
    /// does not hold a valid config.
    pub fn from_json_file(path: &Path) -> Result<Self, SessionError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            SessionError::invalid_config("config", format!("{}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    /// Selects the checksum algorithm by name (`sha256`, `sha1`, `md5`, `sha512`).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownAlgorithm`] for unsupported names.
    pub fn with_algorithm_name(mut self, name: &str) -> Result<Self, SessionError> {
        self.algorithm = name
            .parse::<ChecksumAlgorithm>()
            .map_err(|_| SessionError::UnknownAlgorithm {
                name: name.to_string(),
            })?;
        Ok(self)
    }

    #[must_use]
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Checks every value is in range.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<(), SessionError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(SessionError::invalid_config(
                "concurrency",
                format!(
                    "value {} must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}",
                    self.concurrency
                ),
            ));
        }
        Ok(())
    }
}
