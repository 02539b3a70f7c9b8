//! Checksum sidecar files stored next to downloaded files.
//!
//! A sidecar lives at `<file>.<algorithm>` and holds the bare hex digest of
//! the file as of its last successful verification. Its presence lets a later
//! session skip re-hashing; its absence forces recomputation.

use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use super::{ChecksumAlgorithm, VerifyError};

/// Derives the sidecar path for `file` under `algorithm`.
///
/// Examples:
/// - `data/1MB.dat` + sha1 → `data/1MB.dat.sha1`
/// - `archive.tar.gz` + sha256 → `archive.tar.gz.sha256`
#[must_use]
pub fn sidecar_path(file: &Path, algorithm: ChecksumAlgorithm) -> PathBuf {
    let mut name = OsString::from(file.as_os_str());
    name.push(".");
    name.push(algorithm.as_str());
    PathBuf::from(name)
}

/// Reads a sidecar digest, returning `None` when no sidecar exists.
///
/// # Errors
///
/// Returns [`VerifyError::Io`] if the sidecar exists but cannot be read.
pub fn read_sidecar(path: &Path) -> Result<Option<String>, VerifyError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents.trim().to_ascii_lowercase())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(VerifyError::io(path, err)),
    }
}

/// Writes `digest` to the sidecar at `path`, replacing any previous value.
///
/// # Errors
///
/// Returns [`VerifyError::Io`] if the sidecar cannot be written.
#[instrument(level = "debug", skip(digest), fields(path = %path.display()))]
pub fn write_sidecar(path: &Path, digest: &str) -> Result<(), VerifyError> {
    fs::write(path, digest).map_err(|e| VerifyError::io(path, e))?;
    debug!("sidecar written");
    Ok(())
}

/// Removes a sidecar if present.
///
/// # Errors
///
/// Returns [`VerifyError::Io`] for failures other than the file being absent.
pub fn remove_sidecar(path: &Path) -> Result<(), VerifyError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(VerifyError::io(path, err)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sidecar_path_appends_algorithm_suffix() {
        let path = Path::new("/tmp/1MB.dat");
        assert_eq!(
            sidecar_path(path, ChecksumAlgorithm::Sha1),
            PathBuf::from("/tmp/1MB.dat.sha1")
        );
    }

    #[test]
    fn test_sidecar_path_keeps_existing_extensions() {
        let path = Path::new("/tmp/archive.tar.gz");
        assert_eq!(
            sidecar_path(path, ChecksumAlgorithm::Sha256),
            PathBuf::from("/tmp/archive.tar.gz.sha256")
        );
    }

    #[test]
    fn test_sidecar_path_differs_per_algorithm() {
        let path = Path::new("file.bin");
        assert_ne!(
            sidecar_path(path, ChecksumAlgorithm::Md5),
            sidecar_path(path, ChecksumAlgorithm::Sha1)
        );
    }

    #[test]
    fn test_read_sidecar_missing_returns_none() {
        let temp = TempDir::new().unwrap();
        let result = read_sidecar(&temp.path().join("absent.sha256")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_write_then_read_sidecar_returns_digest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("file.bin.md5");
        write_sidecar(&path, "900150983cd24fb0d6963f7d28e17f72").unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert_eq!(raw, "900150983cd24fb0d6963f7d28e17f72", "no framing expected");
        assert_eq!(
            read_sidecar(&path).unwrap().as_deref(),
            Some("900150983cd24fb0d6963f7d28e17f72")
        );
    }

    #[test]
    fn test_read_sidecar_normalizes_whitespace_and_case() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("file.bin.sha1");
        fs::write(&path, "ABCDEF\n").unwrap();
        assert_eq!(read_sidecar(&path).unwrap().as_deref(), Some("abcdef"));
    }

    #[test]
    fn test_remove_sidecar_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("file.bin.sha256");
        fs::write(&path, "00").unwrap();

        remove_sidecar(&path).unwrap();
        assert!(!path.exists());
        remove_sidecar(&path).unwrap();
    }
}
