//! Run record: evidence of each output's last successful production.
//!
//! Keyed by declared output path. An entry exists only for outputs whose
//! most recent execution succeeded; failed or discarded executions remove
//! it. The record may be persisted as JSON between processes; a file
//! written under a different schema version or fingerprint strategy is
//! ignored as a whole.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::RunnerError;
use crate::fingerprint::{Fingerprint, FingerprintStrategy};

/// Current schema version. Bump when the record format changes.
const RECORD_VERSION: u32 = 2;

/// Fingerprints of one successful execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEntry {
    /// Declared inputs and their state at the time of success.
    pub inputs: BTreeMap<PathBuf, Fingerprint>,
    /// State of the output right after it was produced (mtime and size).
    pub output: Fingerprint,
    /// Hash of the argv that produced the output, for process actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl RunEntry {
    /// Fingerprint `inputs` and `output` after a successful execution.
    ///
    /// Keys are the declared paths; files are read at `root.join(path)`.
    pub fn capture<'a>(
        root: &Path,
        inputs: impl IntoIterator<Item = &'a Path>,
        output: &Path,
        strategy: FingerprintStrategy,
    ) -> io::Result<Self> {
        let mut recorded = BTreeMap::new();
        for input in inputs {
            let fp = Fingerprint::capture(&root.join(input), strategy)?;
            recorded.insert(input.to_path_buf(), fp);
        }
        Ok(Self {
            inputs: recorded,
            output: Fingerprint::stat_only(&root.join(output))?,
            command: None,
        })
    }
}

/// All recorded executions, keyed by output path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    version: u32,
    strategy: FingerprintStrategy,
    entries: BTreeMap<PathBuf, RunEntry>,
}

impl RunRecord {
    /// Create an empty record for `strategy`.
    pub fn new(strategy: FingerprintStrategy) -> Self {
        Self {
            version: RECORD_VERSION,
            strategy,
            entries: BTreeMap::new(),
        }
    }

    /// Load a record from `path`.
    ///
    /// A missing, corrupt, or incompatible file yields an empty record: the
    /// cost is a full rebuild, never a false cache hit.
    pub fn load(path: &Path, strategy: FingerprintStrategy) -> Self {
        let data = match fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Self::new(strategy),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable run record, starting fresh");
                return Self::new(strategy);
            }
        };
        let record: Self = match serde_json::from_str(&data) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "corrupt run record, starting fresh");
                return Self::new(strategy);
            }
        };
        if record.version != RECORD_VERSION || record.strategy != strategy {
            tracing::debug!(
                path = %path.display(),
                version = record.version,
                strategy = %record.strategy,
                "run record incompatible, discarding"
            );
            return Self::new(strategy);
        }
        record
    }

    /// Save the record atomically (write to tmp, then rename).
    pub fn save(&self, path: &Path) -> Result<(), RunnerError> {
        let fail = |reason: String| RunnerError::Record {
            path: path.to_path_buf(),
            reason,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| fail(e.to_string()))?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let json = serde_json::to_string_pretty(self).map_err(|e| fail(e.to_string()))?;
        fs::write(&tmp, json).map_err(|e| fail(format!("failed to write temporary file: {e}")))?;
        fs::rename(&tmp, path).map_err(|e| fail(format!("failed to replace record: {e}")))?;
        Ok(())
    }

    /// Fingerprinting strategy the entries were produced under.
    pub fn strategy(&self) -> FingerprintStrategy {
        self.strategy
    }

    /// The entry for `output`, if its last execution succeeded.
    pub fn get(&self, output: &Path) -> Option<&RunEntry> {
        self.entries.get(output)
    }

    pub(crate) fn get_mut(&mut self, output: &Path) -> Option<&mut RunEntry> {
        self.entries.get_mut(output)
    }

    /// Record a successful execution.
    pub fn insert(&mut self, output: PathBuf, entry: RunEntry) {
        self.entries.insert(output, entry);
    }

    /// Forget `output`, so the next check treats it as stale.
    pub fn invalidate(&mut self, output: &Path) -> Option<RunEntry> {
        self.entries.remove(output)
    }

    /// Number of recorded outputs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RunRecord {
    fn default() -> Self {
        Self::new(FingerprintStrategy::default())
    }
}
