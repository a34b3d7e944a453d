//! The orchestrator instance.
//!
//! A [`Runner`] owns the run record and the invocation ledger for one build
//! invocation. Callers register actions into the current stage, call
//! [`Runner::run`] to execute it, and repeat for the next stage. There is no
//! ordering between stages other than the order in which the caller runs
//! them: an action that consumes another action's output must be registered
//! in a later stage.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::action::{Action, ActionOptions, Operation};
use crate::error::RunnerError;
use crate::executor::{self, StageReport};
use crate::ledger::{CompileCommand, InvocationLedger};
use crate::oracle::{self, Query, Verdict};
use crate::options::RunnerOptions;
use crate::process;
use crate::record::RunRecord;

/// Incremental command runner.
pub struct Runner {
    options: RunnerOptions,
    record: RunRecord,
    ledger: InvocationLedger,
    stage: Vec<Action>,
    /// Resolved outputs claimed in the current stage.
    claimed: HashSet<PathBuf>,
}

impl Runner {
    /// Create a runner. A relative root is made absolute against the current
    /// directory. When `options.record_file` is set, the persisted run record
    /// is loaded from it.
    pub fn new(mut options: RunnerOptions) -> Self {
        options.root = std::path::absolute(&options.root).unwrap_or(options.root);
        let record = match options.resolved_record_file() {
            Some(path) => RunRecord::load(&path, options.fingerprint),
            None => RunRecord::new(options.fingerprint),
        };
        Self {
            options,
            record,
            ledger: InvocationLedger::new(),
            stage: Vec::new(),
            claimed: HashSet::new(),
        }
    }

    /// The runner root.
    pub fn root(&self) -> &Path {
        &self.options.root
    }

    /// The configuration this runner was built with.
    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// The run record.
    pub fn record(&self) -> &RunRecord {
        &self.record
    }

    /// Register an action in the current stage.
    pub fn add_action<I, P>(
        &mut self,
        inputs: I,
        output: impl Into<PathBuf>,
        operation: Operation,
        options: ActionOptions,
    ) -> Result<(), RunnerError>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.add(Action::new(inputs, output, operation).with_options(options))
    }

    /// Register a prepared action in the current stage.
    ///
    /// Fails if another action in this stage already claims the same output,
    /// or if a process action has an empty command line. Nothing runs until
    /// [`Runner::run`].
    pub fn add(&mut self, action: Action) -> Result<(), RunnerError> {
        if action.operation.argv().is_some_and(<[String]>::is_empty) {
            return Err(RunnerError::EmptyCommand {
                output: action.output.clone(),
            });
        }
        let resolved = self.options.root.join(&action.output);
        if !self.claimed.insert(resolved) {
            return Err(RunnerError::DuplicateOutput {
                output: action.output.clone(),
            });
        }
        self.stage.push(action);
        Ok(())
    }

    /// Number of actions registered in the current stage.
    pub fn pending(&self) -> usize {
        self.stage.len()
    }

    /// Whether `action` would execute if it were run now. Nothing runs.
    pub fn is_stale(&mut self, action: &Action) -> bool {
        !self.verdict(action).is_fresh()
    }

    /// The oracle's verdict for `action` against the current run record.
    pub fn verdict(&mut self, action: &Action) -> Verdict {
        let query = Query {
            root: &self.options.root,
            inputs: &action.inputs,
            output: &action.output,
            command: action.operation.argv(),
            force: action.options.force,
        };
        oracle::verdict(&mut self.record, &query)
    }

    /// Execute the current stage.
    ///
    /// Blocks until every stale action has finished or one has failed. The
    /// stage is cleared either way. When a record file is configured, the
    /// record is written back before returning.
    pub fn run(&mut self) -> Result<StageReport, RunnerError> {
        let actions = std::mem::take(&mut self.stage);
        self.claimed.clear();

        let result = executor::execute_stage(
            actions,
            &mut self.record,
            &self.options.root,
            self.options.worker_count(),
        );

        let saved = self.save_record();
        if let (Err(_), Err(error)) = (&result, &saved) {
            tracing::warn!(error = %error, "failed to save run record after stage failure");
        }
        let report = result?;
        saved?;

        tracing::debug!(
            registered = report.registered,
            executed = report.executed,
            skipped = report.skipped,
            "stage complete"
        );
        Ok(report)
    }

    /// Spawn `argv` in the runner root right now, uncached, with output
    /// streamed to this process. A non-zero exit fails with `step` attached.
    pub fn run_direct<S: AsRef<str>>(&self, argv: &[S], step: &str) -> Result<(), RunnerError> {
        let argv: Vec<String> = argv.iter().map(|s| s.as_ref().to_string()).collect();
        tracing::info!(step, command = %argv.join(" "), "Running");
        process::run_streamed_checked(&argv, &self.options.root, step)
    }

    /// Record the command line used to compile `file`.
    pub fn record_invocation<S: Into<String>>(
        &mut self,
        file: impl Into<PathBuf>,
        arguments: impl IntoIterator<Item = S>,
    ) {
        self.ledger
            .record(file, arguments.into_iter().map(Into::into).collect());
    }

    /// The invocation ledger.
    pub fn ledger(&self) -> &InvocationLedger {
        &self.ledger
    }

    /// The compilation database, one entry per recorded invocation.
    pub fn compile_commands(&self) -> Vec<CompileCommand> {
        self.ledger.export(&self.options.root)
    }

    /// Write the compilation database to `path` (relative to the root).
    pub fn write_compile_commands(&self, path: impl AsRef<Path>) -> Result<(), RunnerError> {
        let path = self.options.root.join(path);
        self.ledger.write(&self.options.root, &path)
    }

    /// Persist the run record if a record file is configured.
    pub fn save_record(&self) -> Result<(), RunnerError> {
        match self.options.resolved_record_file() {
            Some(path) => self.record.save(&path),
            None => Ok(()),
        }
    }

    /// Write back the run record and tear the runner down. Actions still
    /// registered in an unrun stage are dropped.
    pub fn finish(self) -> Result<(), RunnerError> {
        if !self.stage.is_empty() {
            tracing::warn!(pending = self.stage.len(), "dropping actions from a stage that was never run");
        }
        self.save_record()
    }
}
