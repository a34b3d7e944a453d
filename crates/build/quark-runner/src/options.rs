//! Runner configuration.

use std::path::PathBuf;

use crate::fingerprint::FingerprintStrategy;

/// Configuration for a [`Runner`](crate::Runner).
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Root directory: default working directory for every action and the
    /// base for relative paths.
    pub root: PathBuf,
    /// Maximum number of parallel workers (0 = auto-detect from CPU count).
    pub jobs: usize,
    /// How inputs are compared against the run record.
    pub fingerprint: FingerprintStrategy,
    /// Where to persist the run record between processes. `None` keeps it
    /// in memory only. Relative paths resolve against `root`.
    pub record_file: Option<PathBuf>,
}

impl RunnerOptions {
    /// Options rooted at `root`, with defaults for everything else.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            jobs: 0,
            fingerprint: FingerprintStrategy::default(),
            record_file: None,
        }
    }

    /// Set the worker count (0 = auto).
    #[must_use]
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    /// Set the fingerprinting strategy.
    #[must_use]
    pub fn fingerprint(mut self, strategy: FingerprintStrategy) -> Self {
        self.fingerprint = strategy;
        self
    }

    /// Persist the run record at `path`.
    #[must_use]
    pub fn record_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.record_file = Some(path.into());
        self
    }

    /// The effective worker count.
    pub fn worker_count(&self) -> usize {
        match self.jobs {
            0 => std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get),
            n => n,
        }
    }

    /// The record file resolved against the root.
    pub fn resolved_record_file(&self) -> Option<PathBuf> {
        self.record_file.as_ref().map(|p| self.root.join(p))
    }
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self::new(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}
