//! File fingerprints used as freshness evidence.
//!
//! A fingerprint captures a file's modification time (nanoseconds since the
//! Unix epoch), its size, and optionally a SHA-256 hash of its contents.
//! Which parts are compared is decided by the [`FingerprintStrategy`].

use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// How input files are compared against the run record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FingerprintStrategy {
    /// Compare SHA-256 content hashes. Robust on filesystems with coarse
    /// timestamp resolution.
    #[default]
    ContentHash,
    /// Accept an input whose mtime and size are unchanged without hashing;
    /// otherwise fall back to the content hash.
    Hybrid,
    /// Compare mtime and size only.
    Timestamp,
}

impl FingerprintStrategy {
    /// Whether fingerprints taken under this strategy carry a content hash.
    pub fn hashes_contents(self) -> bool {
        !matches!(self, Self::Timestamp)
    }

    /// Stable name, as used in configuration files.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContentHash => "content-hash",
            Self::Hybrid => "hybrid",
            Self::Timestamp => "timestamp",
        }
    }
}

impl std::fmt::Display for FingerprintStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FingerprintStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "content-hash" => Ok(Self::ContentHash),
            "hybrid" => Ok(Self::Hybrid),
            "timestamp" => Ok(Self::Timestamp),
            other => Err(format!(
                "unknown fingerprint strategy `{other}` (expected content-hash, hybrid or timestamp)"
            )),
        }
    }
}

/// Recorded state of a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Modification time in nanoseconds since the Unix epoch.
    pub mtime_ns: i64,
    /// File size in bytes.
    pub size: u64,
    /// Hex SHA-256 of the contents, when the strategy hashes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl Fingerprint {
    /// Take a fingerprint of `path` under `strategy`.
    pub fn capture(path: &Path, strategy: FingerprintStrategy) -> io::Result<Self> {
        let (mtime_ns, size) = stat(path)?;
        let content_hash = if strategy.hashes_contents() {
            Some(hash_file(path)?)
        } else {
            None
        };
        Ok(Self {
            mtime_ns,
            size,
            content_hash,
        })
    }

    /// Take an mtime/size-only fingerprint, regardless of strategy.
    pub fn stat_only(path: &Path) -> io::Result<Self> {
        let (mtime_ns, size) = stat(path)?;
        Ok(Self {
            mtime_ns,
            size,
            content_hash: None,
        })
    }

    /// Whether mtime and size match `other`.
    pub fn same_stat(&self, other: &Self) -> bool {
        self.mtime_ns == other.mtime_ns && self.size == other.size
    }
}

/// Modification time (ns since epoch) and size of `path`.
pub fn stat(path: &Path) -> io::Result<(i64, u64)> {
    let meta = fs::metadata(path)?;
    Ok((system_time_ns(meta.modified()?), meta.len()))
}

/// Modification time of `path` in nanoseconds since the epoch, if it exists.
pub fn mtime_ns(path: &Path) -> Option<i64> {
    stat(path).ok().map(|(mtime, _)| mtime)
}

fn system_time_ns(time: SystemTime) -> i64 {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        // Pre-epoch timestamps: negative offset.
        Err(e) => i64::try_from(e.duration().as_nanos()).map_or(i64::MIN, |n| -n),
    }
}

/// SHA-256 hash of a file's contents, returned as a hex string.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let data = fs::read(path)?;
    Ok(hash_bytes(&data))
}

/// SHA-256 hash of a command line. Arguments are NUL-separated so that
/// `["a b"]` and `["a", "b"]` differ.
pub fn hash_command(argv: &[String]) -> String {
    let mut hasher = Sha256::new();
    for arg in argv {
        hasher.update(arg.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// SHA-256 hash of a byte slice, returned as a hex string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
