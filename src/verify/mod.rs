//! Checksum verification and incremental-sync decisions.
//!
//! This module decides whether a destination file already holds the expected
//! content, computes streaming digests, and persists checksum sidecars.
//!
//! # Overview
//!
//! - [`ChecksumAlgorithm`] - digest selection by name (`sha256`, `sha1`, ...)
//! - [`inspect_local`] - cheap, synchronous look at the destination and its sidecar
//! - [`hash_file`] - streaming digest with per-chunk progress and abort support
//! - [`sidecar`] - `<file>.<algorithm>` sidecar read/write
//!
//! # Example
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use batch_downloader::verify::{ChecksumAlgorithm, hash_file};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let abort = AtomicBool::new(false);
//! let digest = hash_file("./downloads/1MB.dat".as_ref(), ChecksumAlgorithm::Sha1, &abort, |_| {})
//!     .await?;
//! println!("{digest:?}");
//! # Ok(())
//! # }
//! ```

mod algorithm;
mod error;
pub mod sidecar;

pub use algorithm::{ChecksumAlgorithm, StreamingHasher};
pub use error::VerifyError;
pub use sidecar::{read_sidecar, remove_sidecar, sidecar_path, write_sidecar};

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};

/// Read buffer size for streaming digests (64 KiB).
pub const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// What is known about a destination before any content is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalFile {
    /// Destination does not exist; a download is required.
    Missing,
    /// Destination exists and no checksum is expected; trusted on existence alone.
    Unverified,
    /// Destination exists and a sidecar records its digest.
    Recorded(String),
    /// Destination exists without a sidecar; its digest must be computed.
    NeedsDigest,
}

/// Classifies the destination file for incremental sync.
///
/// Only metadata and the (small) sidecar are read, so this is safe to call
/// from the orchestrator without yielding.
///
/// # Errors
///
/// Returns [`VerifyError::Io`] if the destination metadata or its sidecar
/// cannot be read for reasons other than absence.
pub fn inspect_local(
    file: &Path,
    expected_checksum: Option<&str>,
    algorithm: ChecksumAlgorithm,
) -> Result<LocalFile, VerifyError> {
    match std::fs::metadata(file) {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(LocalFile::Missing),
        Err(err) => return Err(VerifyError::io(file, err)),
    }

    if expected_checksum.is_none() {
        return Ok(LocalFile::Unverified);
    }

    match read_sidecar(&sidecar_path(file, algorithm))? {
        Some(digest) => Ok(LocalFile::Recorded(digest)),
        None => Ok(LocalFile::NeedsDigest),
    }
}

/// Returns true when `actual` matches the expected checksum (case-insensitive).
#[must_use]
pub fn checksum_matches(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}

/// Streams `file` through `algorithm`, reporting each chunk's size.
///
/// `abort` is checked before every chunk; once it is set the digest is
/// abandoned and `Ok(None)` is returned.
///
/// # Errors
///
/// Returns [`VerifyError::Io`] if the file cannot be opened or read.
#[instrument(level = "debug", skip(abort, on_chunk), fields(path = %file.display(), algorithm = %algorithm))]
pub async fn hash_file<F>(
    file: &Path,
    algorithm: ChecksumAlgorithm,
    abort: &AtomicBool,
    mut on_chunk: F,
) -> Result<Option<String>, VerifyError>
where
    F: FnMut(u64),
{
    let mut reader = File::open(file)
        .await
        .map_err(|e| VerifyError::io(file, e))?;
    let mut hasher = algorithm.hasher();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
    let mut total: u64 = 0;

    loop {
        if abort.load(Ordering::SeqCst) {
            debug!(bytes = total, "digest aborted");
            return Ok(None);
        }

        let read = reader
            .read(&mut buffer)
            .await
            .map_err(|e| VerifyError::io(file, e))?;
        if read == 0 {
            break;
        }

        hasher.update(&buffer[..read]);
        total += read as u64;
        on_chunk(read as u64);
    }

    let digest = hasher.finalize_hex();
    debug!(bytes = total, digest = %digest, "digest computed");
    Ok(Some(digest))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn test_inspect_local_missing_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("absent.bin");
        let result = inspect_local(&file, Some(ABC_SHA256), ChecksumAlgorithm::Sha256).unwrap();
        assert_eq!(result, LocalFile::Missing);
    }

    #[test]
    fn test_inspect_local_without_expected_checksum_is_unverified() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file.bin");
        fs::write(&file, b"abc").unwrap();
        let result = inspect_local(&file, None, ChecksumAlgorithm::Sha256).unwrap();
        assert_eq!(result, LocalFile::Unverified);
    }

    #[test]
    fn test_inspect_local_reads_recorded_sidecar() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file.bin");
        fs::write(&file, b"abc").unwrap();
        fs::write(temp.path().join("file.bin.sha256"), ABC_SHA256).unwrap();

        let result = inspect_local(&file, Some(ABC_SHA256), ChecksumAlgorithm::Sha256).unwrap();
        assert_eq!(result, LocalFile::Recorded(ABC_SHA256.to_string()));
    }

    #[test]
    fn test_inspect_local_ignores_sidecar_of_other_algorithm() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file.bin");
        fs::write(&file, b"abc").unwrap();
        fs::write(temp.path().join("file.bin.sha256"), ABC_SHA256).unwrap();

        let result = inspect_local(&file, Some("deadbeef"), ChecksumAlgorithm::Md5).unwrap();
        assert_eq!(result, LocalFile::NeedsDigest);
    }

    #[test]
    fn test_checksum_matches_is_case_insensitive() {
        assert!(checksum_matches("ABCDEF", "abcdef"));
        assert!(!checksum_matches("abcdef", "abcdee"));
    }

    #[tokio::test]
    async fn test_hash_file_reports_every_byte() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("big.bin");
        let data = vec![7u8; HASH_CHUNK_SIZE * 2 + 10];
        fs::write(&file, &data).unwrap();

        let abort = AtomicBool::new(false);
        let mut seen = 0u64;
        let mut chunks = 0usize;
        let digest = hash_file(&file, ChecksumAlgorithm::Sha256, &abort, |n| {
            seen += n;
            chunks += 1;
        })
        .await
        .unwrap();

        let mut expected = ChecksumAlgorithm::Sha256.hasher();
        expected.update(&data);
        assert_eq!(digest, Some(expected.finalize_hex()));
        assert_eq!(seen, data.len() as u64);
        assert!(chunks >= 3, "expected chunked reads, got {chunks}");
    }

    #[tokio::test]
    async fn test_hash_file_known_digest() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("abc.txt");
        fs::write(&file, b"abc").unwrap();

        let abort = AtomicBool::new(false);
        let digest = hash_file(&file, ChecksumAlgorithm::Sha256, &abort, |_| {})
            .await
            .unwrap();
        assert_eq!(digest.as_deref(), Some(ABC_SHA256));
    }

    #[tokio::test]
    async fn test_hash_file_aborted_returns_none() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("abc.txt");
        fs::write(&file, b"abc").unwrap();

        let abort = AtomicBool::new(true);
        let digest = hash_file(&file, ChecksumAlgorithm::Sha256, &abort, |_| {
            panic!("no chunk should be read after abort");
        })
        .await
        .unwrap();
        assert!(digest.is_none());
    }

    #[tokio::test]
    async fn test_hash_file_missing_file_is_io_error() {
        let temp = TempDir::new().unwrap();
        let abort = AtomicBool::new(false);
        let result = hash_file(
            &temp.path().join("absent"),
            ChecksumAlgorithm::Md5,
            &abort,
            |_| {},
        )
        .await;
        assert!(matches!(result, Err(VerifyError::Io { .. })));
    }
}
