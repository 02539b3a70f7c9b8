//! Digest algorithms selectable by name.

use std::fmt;
use std::str::FromStr;

use md5::Md5;
use serde::Deserialize;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use super::VerifyError;

/// Checksum algorithm used for verification and sidecar naming.
///
/// The lowercase name doubles as the sidecar file suffix, so a file verified
/// with SHA-1 keeps its digest in `<file>.sha1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// SHA-256 (default).
    #[default]
    Sha256,
    /// SHA-512.
    Sha512,
    /// SHA-1.
    Sha1,
    /// MD5.
    Md5,
}

impl ChecksumAlgorithm {
    /// Returns the lowercase algorithm name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Sha1 => "sha1",
            Self::Md5 => "md5",
        }
    }

    /// Returns the length of the hex-encoded digest.
    #[must_use]
    pub fn hex_len(self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha512 => 128,
            Self::Sha1 => 40,
            Self::Md5 => 32,
        }
    }

    /// Creates a fresh streaming hasher for this algorithm.
    #[must_use]
    pub fn hasher(self) -> StreamingHasher {
        match self {
            Self::Sha256 => StreamingHasher::Sha256(Sha256::new()),
            Self::Sha512 => StreamingHasher::Sha512(Sha512::new()),
            Self::Sha1 => StreamingHasher::Sha1(Sha1::new()),
            Self::Md5 => StreamingHasher::Md5(Md5::new()),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = VerifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "sha512" | "sha-512" => Ok(Self::Sha512),
            "sha1" | "sha-1" => Ok(Self::Sha1),
            "md5" => Ok(Self::Md5),
            _ => Err(VerifyError::unknown_algorithm(s)),
        }
    }
}

/// Incremental digest state, finalized to lowercase hex.
#[derive(Debug, Clone)]
pub enum StreamingHasher {
    Sha256(Sha256),
    Sha512(Sha512),
    Sha1(Sha1),
    Md5(Md5),
}

impl StreamingHasher {
    /// Feeds a chunk of bytes into the digest.
    pub fn update(&mut self, chunk: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(chunk),
            Self::Sha512(h) => h.update(chunk),
            Self::Sha1(h) => h.update(chunk),
            Self::Md5(h) => h.update(chunk),
        }
    }

    /// Consumes the hasher and returns the hex digest.
    #[must_use]
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Md5(h) => hex::encode(h.finalize()),
        }
    }
}
