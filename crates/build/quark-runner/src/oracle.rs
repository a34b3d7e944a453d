//! Validity oracle: decides whether an action's output can be reused.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::fingerprint::{self, Fingerprint, FingerprintStrategy};
use crate::record::RunRecord;

/// Result of a freshness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The output is valid; the action is skipped.
    Fresh,
    /// The action must execute.
    Stale(StaleReason),
}

impl Verdict {
    /// Returns `true` if the result is `Fresh`.
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }
}

/// Why an action was judged stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// The action was registered with `force`.
    Forced,
    /// The declared output does not exist.
    OutputMissing,
    /// No successful execution is recorded for the output.
    NoRecord,
    /// The declared input set differs from the recorded one.
    InputsChanged,
    /// The command line differs from the one that produced the output.
    CommandChanged,
    /// The output was modified since it was produced.
    OutputModified,
    /// A declared input does not exist.
    InputMissing(PathBuf),
    /// A declared input's fingerprint differs from the recorded one.
    InputChanged(PathBuf),
    /// The output is older than an input.
    InputNewer(PathBuf),
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forced => f.write_str("forced"),
            Self::OutputMissing => f.write_str("output missing"),
            Self::NoRecord => f.write_str("no previous run"),
            Self::InputsChanged => f.write_str("input set changed"),
            Self::CommandChanged => f.write_str("command line changed"),
            Self::OutputModified => f.write_str("output modified externally"),
            Self::InputMissing(p) => write!(f, "input missing: {}", p.display()),
            Self::InputChanged(p) => write!(f, "input changed: {}", p.display()),
            Self::InputNewer(p) => write!(f, "input newer than output: {}", p.display()),
        }
    }
}

/// What the oracle needs to know about an action.
#[derive(Debug, Clone, Copy)]
pub struct Query<'a> {
    /// Runner root; declared paths resolve against it.
    pub root: &'a Path,
    /// Declared inputs.
    pub inputs: &'a BTreeSet<PathBuf>,
    /// Declared output.
    pub output: &'a Path,
    /// Argv of a process action; `None` for callbacks.
    pub command: Option<&'a [String]>,
    /// Whether the action bypasses the cache.
    pub force: bool,
}

/// Decide whether the action described by `query` must execute.
///
/// Under [`FingerprintStrategy::Hybrid`] an input whose contents are
/// unchanged despite a new mtime has its recorded mtime refreshed, so the
/// next check takes the fast path again.
pub fn verdict(record: &mut RunRecord, query: &Query<'_>) -> Verdict {
    if query.force {
        return Verdict::Stale(StaleReason::Forced);
    }

    let output_path = query.root.join(query.output);
    let Ok(output_now) = Fingerprint::stat_only(&output_path) else {
        return Verdict::Stale(StaleReason::OutputMissing);
    };

    let strategy = record.strategy();
    let Some(entry) = record.get_mut(query.output) else {
        return Verdict::Stale(StaleReason::NoRecord);
    };

    if !entry.inputs.keys().eq(query.inputs.iter()) {
        return Verdict::Stale(StaleReason::InputsChanged);
    }

    if entry.command.as_deref() != query.command.map(fingerprint::hash_command).as_deref() {
        return Verdict::Stale(StaleReason::CommandChanged);
    }

    if !entry.output.same_stat(&output_now) {
        return Verdict::Stale(StaleReason::OutputModified);
    }

    let mut newest_input: Option<(i64, &PathBuf)> = None;
    for (input, recorded) in &mut entry.inputs {
        let path = query.root.join(input);
        let Ok(current) = Fingerprint::stat_only(&path) else {
            return Verdict::Stale(StaleReason::InputMissing(input.clone()));
        };

        if !input_matches(strategy, &path, recorded, &current) {
            return Verdict::Stale(StaleReason::InputChanged(input.clone()));
        }

        if newest_input.is_none_or(|(mtime, _)| current.mtime_ns > mtime) {
            newest_input = Some((current.mtime_ns, input));
        }
    }

    if let Some((mtime, input)) = newest_input {
        if output_now.mtime_ns < mtime {
            return Verdict::Stale(StaleReason::InputNewer(input.clone()));
        }
    }

    Verdict::Fresh
}

/// Convenience wrapper: `true` when [`verdict`] is not `Fresh`.
pub fn is_stale(record: &mut RunRecord, query: &Query<'_>) -> bool {
    !verdict(record, query).is_fresh()
}

/// Compare one input against its recorded fingerprint.
fn input_matches(
    strategy: FingerprintStrategy,
    path: &Path,
    recorded: &mut Fingerprint,
    current: &Fingerprint,
) -> bool {
    match strategy {
        FingerprintStrategy::Timestamp => recorded.same_stat(current),
        FingerprintStrategy::ContentHash => content_matches(path, recorded),
        FingerprintStrategy::Hybrid => {
            // Fast path: mtime and size unchanged.
            if recorded.same_stat(current) {
                return true;
            }
            if !content_matches(path, recorded) {
                return false;
            }
            // Content unchanged despite the new mtime; refresh the stored stat.
            recorded.mtime_ns = current.mtime_ns;
            recorded.size = current.size;
            true
        }
    }
}

fn content_matches(path: &Path, recorded: &Fingerprint) -> bool {
    let Some(expected) = recorded.content_hash.as_deref() else {
        return false;
    };
    match fingerprint::hash_file(path) {
        Ok(actual) => actual == expected,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RunEntry;
    use std::fs;
    use std::time::{Duration, SystemTime};

    fn set_mtime(path: &Path, time: SystemTime) {
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    struct Fixture {
        dir: tempfile::TempDir,
        inputs: BTreeSet<PathBuf>,
        record: RunRecord,
    }

    impl Fixture {
        /// `in.txt` -> `out.txt`, recorded as a successful run.
        fn new(strategy: FingerprintStrategy) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let base = SystemTime::now() - Duration::from_secs(60);
            fs::write(dir.path().join("in.txt"), "hello").unwrap();
            set_mtime(&dir.path().join("in.txt"), base);
            fs::write(dir.path().join("out.txt"), "HELLO").unwrap();
            set_mtime(&dir.path().join("out.txt"), base + Duration::from_secs(1));

            let inputs: BTreeSet<PathBuf> = [PathBuf::from("in.txt")].into();
            let mut record = RunRecord::new(strategy);
            let entry = RunEntry::capture(
                dir.path(),
                inputs.iter().map(PathBuf::as_path),
                Path::new("out.txt"),
                strategy,
            )
            .unwrap();
            record.insert(PathBuf::from("out.txt"), entry);
            Self { dir, inputs, record }
        }

        fn check(&mut self, force: bool) -> Verdict {
            self.check_command(None, force)
        }

        fn check_command(&mut self, command: Option<&[String]>, force: bool) -> Verdict {
            let query = Query {
                root: self.dir.path(),
                inputs: &self.inputs,
                output: Path::new("out.txt"),
                command,
                force,
            };
            verdict(&mut self.record, &query)
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }
    }

    #[test]
    fn recorded_run_is_fresh() {
        let mut fx = Fixture::new(FingerprintStrategy::ContentHash);
        assert_eq!(fx.check(false), Verdict::Fresh);
    }

    #[test]
    fn force_is_always_stale() {
        let mut fx = Fixture::new(FingerprintStrategy::ContentHash);
        assert_eq!(fx.check(true), Verdict::Stale(StaleReason::Forced));
    }

    #[test]
    fn changed_command_line_is_stale() {
        let mut fx = Fixture::new(FingerprintStrategy::ContentHash);
        let plain: Vec<String> = vec!["cc".into(), "-c".into(), "in.txt".into()];
        let optimized: Vec<String> = vec!["cc".into(), "-c".into(), "in.txt".into(), "-O2".into()];
        fx.record.get_mut(Path::new("out.txt")).unwrap().command =
            Some(fingerprint::hash_command(&plain));

        assert_eq!(fx.check_command(Some(&plain), false), Verdict::Fresh);
        assert_eq!(
            fx.check_command(Some(&optimized), false),
            Verdict::Stale(StaleReason::CommandChanged)
        );
        // A callback has no command line to compare against.
        assert_eq!(fx.check(false), Verdict::Stale(StaleReason::CommandChanged));
    }

    #[test]
    fn missing_output_is_stale() {
        let mut fx = Fixture::new(FingerprintStrategy::ContentHash);
        fs::remove_file(fx.path("out.txt")).unwrap();
        assert_eq!(fx.check(false), Verdict::Stale(StaleReason::OutputMissing));
    }

    #[test]
    fn unrecorded_output_is_stale() {
        let mut fx = Fixture::new(FingerprintStrategy::ContentHash);
        fx.record.invalidate(Path::new("out.txt"));
        assert_eq!(fx.check(false), Verdict::Stale(StaleReason::NoRecord));
    }

    #[test]
    fn changed_input_set_is_stale() {
        let mut fx = Fixture::new(FingerprintStrategy::ContentHash);
        fx.inputs.insert(PathBuf::from("extra.h"));
        assert_eq!(fx.check(false), Verdict::Stale(StaleReason::InputsChanged));
    }

    #[test]
    fn changed_content_is_stale() {
        let mut fx = Fixture::new(FingerprintStrategy::ContentHash);
        fs::write(fx.path("in.txt"), "world").unwrap();
        // Keep the output newer so only the content differs.
        set_mtime(&fx.path("in.txt"), SystemTime::now() - Duration::from_secs(60));
        assert_eq!(
            fx.check(false),
            Verdict::Stale(StaleReason::InputChanged(PathBuf::from("in.txt")))
        );
    }

    #[test]
    fn missing_input_is_stale() {
        let mut fx = Fixture::new(FingerprintStrategy::ContentHash);
        fs::remove_file(fx.path("in.txt")).unwrap();
        assert_eq!(
            fx.check(false),
            Verdict::Stale(StaleReason::InputMissing(PathBuf::from("in.txt")))
        );
    }

    #[test]
    fn touched_input_is_newer_than_output() {
        let mut fx = Fixture::new(FingerprintStrategy::ContentHash);
        set_mtime(&fx.path("in.txt"), SystemTime::now());
        assert_eq!(
            fx.check(false),
            Verdict::Stale(StaleReason::InputNewer(PathBuf::from("in.txt")))
        );
    }

    #[test]
    fn touched_output_is_modified() {
        let mut fx = Fixture::new(FingerprintStrategy::ContentHash);
        set_mtime(&fx.path("out.txt"), SystemTime::now());
        assert_eq!(fx.check(false), Verdict::Stale(StaleReason::OutputModified));
    }

    #[test]
    fn timestamp_strategy_ignores_content() {
        let mut fx = Fixture::new(FingerprintStrategy::Timestamp);
        let mtime = fs::metadata(fx.path("in.txt")).unwrap().modified().unwrap();
        // Same size, same mtime, different bytes: invisible to timestamps.
        fs::write(fx.path("in.txt"), "jello").unwrap();
        set_mtime(&fx.path("in.txt"), mtime);
        assert_eq!(fx.check(false), Verdict::Fresh);
    }

    #[test]
    fn hybrid_refreshes_mtime_when_content_unchanged() {
        let mut fx = Fixture::new(FingerprintStrategy::Hybrid);
        let earlier = SystemTime::now() - Duration::from_secs(120);
        set_mtime(&fx.path("in.txt"), earlier);

        assert_eq!(fx.check(false), Verdict::Fresh);
        let recorded = &fx.record.get(Path::new("out.txt")).unwrap().inputs[Path::new("in.txt")];
        assert_eq!(Some(recorded.mtime_ns), fingerprint::mtime_ns(&fx.path("in.txt")));
    }

    #[test]
    fn empty_inputs_fresh_once_recorded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("gen.ys"), "script").unwrap();
        let inputs = BTreeSet::new();
        let query = Query {
            root: dir.path(),
            inputs: &inputs,
            output: Path::new("gen.ys"),
            command: None,
            force: false,
        };

        let mut record = RunRecord::default();
        assert!(is_stale(&mut record, &query));

        let entry = RunEntry::capture(
            dir.path(),
            std::iter::empty(),
            Path::new("gen.ys"),
            record.strategy(),
        )
        .unwrap();
        record.insert(PathBuf::from("gen.ys"), entry);
        assert!(!is_stale(&mut record, &query));
    }
}
