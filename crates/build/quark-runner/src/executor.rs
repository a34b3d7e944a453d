//! Stage executor.
//!
//! Consults the validity oracle for every registered action, then runs the
//! stale ones. Process actions and shared callbacks go to a bounded pool of
//! scoped worker threads fed through an `mpsc` job channel; plain callbacks
//! run on the control thread between dispatches. Workers never touch the run
//! record: they send an [`Outcome`] back and the control thread applies it.
//!
//! On the first failure no further action is launched. Work already in
//! flight is allowed to finish, its results are discarded, and the first
//! error is returned.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, mpsc};
use std::time::{Duration, Instant};

use crate::action::{Action, ActionContext, Callback, Operation, SharedCallback};
use crate::error::RunnerError;
use crate::fingerprint::{self, FingerprintStrategy};
use crate::oracle::{self, Query, Verdict};
use crate::process::{self, ProcessCommand};
use crate::record::{RunEntry, RunRecord};

/// Summary of one `run()` call.
#[derive(Debug, Clone, Default)]
pub struct StageReport {
    /// Actions registered in the stage.
    pub registered: usize,
    /// Actions that executed successfully.
    pub executed: usize,
    /// Actions skipped as fresh.
    pub skipped: usize,
    /// Wall time of each executed action, in completion order.
    pub timings: Vec<(String, Duration)>,
}

impl StageReport {
    /// The `n` slowest executed actions, slowest first.
    pub fn slowest(&self, n: usize) -> Vec<(String, Duration)> {
        let mut sorted = self.timings.clone();
        sorted.sort_by(|a, b| b.1.cmp(&a.1));
        sorted.truncate(n);
        sorted
    }
}

/// Everything a stale action needs to run, minus its operation.
struct Slot {
    label: String,
    output: PathBuf,
    inputs: Vec<PathBuf>,
    ctx: ActionContext,
    /// Hash of the argv, recorded alongside the fingerprints.
    command: Option<String>,
}

/// Work that may run on a worker thread.
enum WorkerTask {
    Process(Vec<String>),
    Shared(SharedCallback),
}

/// A job dispatched to a worker thread.
struct Job {
    slot: usize,
    task: WorkerTask,
    label: String,
    output: PathBuf,
    inputs: Vec<PathBuf>,
    ctx: ActionContext,
}

/// Result sent back from a worker thread (or produced inline).
enum Outcome {
    /// The action succeeded and its output was fingerprinted.
    Completed {
        slot: usize,
        entry: RunEntry,
        duration: Duration,
    },
    /// The action failed.
    Failed { slot: usize, error: RunnerError },
}

/// Run one stage: skip fresh actions, execute stale ones.
pub(crate) fn execute_stage(
    actions: Vec<Action>,
    record: &mut RunRecord,
    root: &Path,
    max_workers: usize,
) -> Result<StageReport, RunnerError> {
    let mut report = StageReport {
        registered: actions.len(),
        ..StageReport::default()
    };

    let mut slots: Vec<Slot> = Vec::new();
    let mut worker_queue: VecDeque<(usize, WorkerTask)> = VecDeque::new();
    let mut local_queue: VecDeque<(usize, Callback)> = VecDeque::new();

    for action in actions {
        let query = Query {
            root,
            inputs: &action.inputs,
            output: &action.output,
            command: action.operation.argv(),
            force: action.options.force,
        };
        let label = action.describe();
        match oracle::verdict(record, &query) {
            Verdict::Fresh => {
                tracing::debug!(action = %label, "skipping (unchanged)");
                report.skipped += 1;
                continue;
            }
            Verdict::Stale(reason) => {
                tracing::debug!(action = %label, %reason, "stale");
            }
        }

        let slot = slots.len();
        let command = action.operation.argv().map(fingerprint::hash_command);
        let Action {
            inputs,
            output,
            operation,
            options,
        } = action;
        let workdir = options.workdir.map_or_else(|| root.to_path_buf(), |d| root.join(d));
        let inputs: Vec<PathBuf> = inputs.into_iter().collect();
        let ctx = ActionContext {
            root: root.to_path_buf(),
            workdir,
            inputs: inputs.iter().map(|p| root.join(p)).collect(),
            output: root.join(&output),
        };
        slots.push(Slot {
            label,
            output,
            inputs,
            ctx,
            command,
        });

        match operation {
            Operation::Process(argv) => worker_queue.push_back((slot, WorkerTask::Process(argv))),
            Operation::SharedCallback(f) => worker_queue.push_back((slot, WorkerTask::Shared(f))),
            Operation::Callback(f) => local_queue.push_back((slot, f)),
        }
    }

    if slots.is_empty() {
        tracing::debug!(skipped = report.skipped, "stage up to date");
        return Ok(report);
    }

    let strategy = record.strategy();
    let num_workers = max_workers.max(1).min(worker_queue.len());
    tracing::debug!(
        stale = slots.len(),
        workers = num_workers,
        local = local_queue.len(),
        "executing stage"
    );

    let (job_tx, job_rx) = mpsc::channel::<Job>();
    let (result_tx, result_rx) = mpsc::channel::<Outcome>();
    let job_rx = Mutex::new(job_rx);
    let job_rx_ref = &job_rx;

    let mut failure: Option<RunnerError> = None;

    std::thread::scope(|s| {
        // Spawn worker threads.
        for _ in 0..num_workers {
            let tx = result_tx.clone();
            s.spawn(move || {
                loop {
                    let job = {
                        let Ok(rx) = job_rx_ref.lock() else { break };
                        match rx.recv() {
                            Ok(j) => j,
                            Err(_) => break,
                        }
                    };
                    let outcome = run_worker_job(job, strategy);
                    if tx.send(outcome).is_err() {
                        break;
                    }
                }
            });
        }

        // Drop the cloned sender so the channel closes when workers finish.
        drop(result_tx);

        // --- Control thread ---
        let mut in_flight = 0usize;
        loop {
            // Keep the pool saturated, but never past the first failure.
            while failure.is_none() && in_flight < num_workers {
                let Some((slot, task)) = worker_queue.pop_front() else {
                    break;
                };
                let info = &slots[slot];
                if let Err(error) = check_inputs(info) {
                    apply(Outcome::Failed { slot, error }, &slots, record, &mut failure, &mut report);
                    break;
                }
                tracing::info!(action = %info.label, "Running");
                let job = Job {
                    slot,
                    task,
                    label: info.label.clone(),
                    output: info.output.clone(),
                    inputs: info.inputs.clone(),
                    ctx: info.ctx.clone(),
                };
                if job_tx.send(job).is_err() {
                    failure.get_or_insert(RunnerError::WorkerLost);
                    break;
                }
                in_flight += 1;
            }

            // Run one control-thread callback while workers are busy.
            if failure.is_none() {
                if let Some((slot, callback)) = local_queue.pop_front() {
                    let outcome = run_local_job(slot, &slots[slot], callback, strategy);
                    apply(outcome, &slots, record, &mut failure, &mut report);
                    continue;
                }
            }

            if in_flight == 0 {
                break;
            }

            // Wait for one worker result.
            if let Ok(outcome) = result_rx.recv() {
                in_flight -= 1;
                apply(outcome, &slots, record, &mut failure, &mut report);
            } else {
                failure.get_or_insert(RunnerError::WorkerLost);
                break;
            }
        }

        // Close the job channel to shut down workers.
        drop(job_tx);
    });

    match failure {
        Some(error) => Err(error),
        None => Ok(report),
    }
}

/// Apply an outcome to the run record. Only the control thread calls this.
fn apply(
    outcome: Outcome,
    slots: &[Slot],
    record: &mut RunRecord,
    failure: &mut Option<RunnerError>,
    report: &mut StageReport,
) {
    match outcome {
        Outcome::Completed {
            slot,
            entry,
            duration,
        } => {
            let info = &slots[slot];
            if failure.is_some() {
                tracing::warn!(action = %info.label, "discarding result of in-flight action after stage failure");
                record.invalidate(&info.output);
                return;
            }
            tracing::debug!(action = %info.label, elapsed = ?duration, "finished");
            let entry = RunEntry {
                command: info.command.clone(),
                ..entry
            };
            record.insert(info.output.clone(), entry);
            report.executed += 1;
            report.timings.push((info.label.clone(), duration));
        }
        Outcome::Failed { slot, error } => {
            let info = &slots[slot];
            record.invalidate(&info.output);
            if failure.is_some() {
                tracing::warn!(action = %info.label, error = %error, "additional failure after stage abort");
            } else {
                *failure = Some(error);
            }
        }
    }
}

/// Every declared input must exist before an action launches.
fn check_inputs(slot: &Slot) -> Result<(), RunnerError> {
    for (declared, resolved) in slot.inputs.iter().zip(&slot.ctx.inputs) {
        if !resolved.exists() {
            return Err(RunnerError::InputUnavailable {
                output: slot.output.clone(),
                input: declared.clone(),
            });
        }
    }
    Ok(())
}

fn run_worker_job(job: Job, strategy: FingerprintStrategy) -> Outcome {
    let start = Instant::now();
    let result = match job.task {
        WorkerTask::Process(argv) => run_process(&argv, &job.ctx, &job.label, &job.output),
        WorkerTask::Shared(f) => run_callback(f, &job.ctx, &job.label, &job.output),
    };
    finish(job.slot, result, &job.ctx.root, &job.inputs, &job.output, &job.label, strategy, start)
}

fn run_local_job(slot: usize, info: &Slot, callback: Callback, strategy: FingerprintStrategy) -> Outcome {
    if let Err(error) = check_inputs(info) {
        return Outcome::Failed { slot, error };
    }
    tracing::info!(action = %info.label, "Running");
    let start = Instant::now();
    let result = run_callback(callback, &info.ctx, &info.label, &info.output);
    finish(slot, result, &info.ctx.root, &info.inputs, &info.output, &info.label, strategy, start)
}

/// Turn an execution result into an outcome, fingerprinting on success.
#[allow(clippy::too_many_arguments)]
fn finish(
    slot: usize,
    result: Result<(), RunnerError>,
    root: &Path,
    inputs: &[PathBuf],
    output: &Path,
    label: &str,
    strategy: FingerprintStrategy,
    start: Instant,
) -> Outcome {
    if let Err(error) = result {
        return Outcome::Failed { slot, error };
    }
    if !root.join(output).exists() {
        return Outcome::Failed {
            slot,
            error: RunnerError::OutputMissing {
                action: label.to_string(),
                output: output.to_path_buf(),
            },
        };
    }
    match RunEntry::capture(root, inputs.iter().map(PathBuf::as_path), output, strategy) {
        Ok(entry) => Outcome::Completed {
            slot,
            entry,
            duration: start.elapsed(),
        },
        Err(e) => Outcome::Failed {
            slot,
            error: RunnerError::ActionFailed {
                action: label.to_string(),
                output: output.to_path_buf(),
                cause: "could not fingerprint results".to_string(),
                diagnostics: e.to_string(),
            },
        },
    }
}

fn run_process(argv: &[String], ctx: &ActionContext, label: &str, output: &Path) -> Result<(), RunnerError> {
    let failed = |cause: String, diagnostics: String| RunnerError::ActionFailed {
        action: label.to_string(),
        output: output.to_path_buf(),
        cause,
        diagnostics,
    };
    let Some(mut cmd) = ProcessCommand::new(argv, &ctx.workdir) else {
        return Err(RunnerError::EmptyCommand {
            output: output.to_path_buf(),
        });
    };
    let result = cmd
        .run_captured()
        .map_err(|e| failed(format!("failed to start `{}`", cmd.program()), e.to_string()))?;
    if result.status.success() {
        Ok(())
    } else {
        Err(failed(
            process::describe_status(result.status),
            process::collect_diagnostics(&result),
        ))
    }
}

fn run_callback<F>(f: F, ctx: &ActionContext, label: &str, output: &Path) -> Result<(), RunnerError>
where
    F: FnOnce(&ActionContext) -> anyhow::Result<()>,
{
    let failed = |cause: &str, diagnostics: String| RunnerError::ActionFailed {
        action: label.to_string(),
        output: output.to_path_buf(),
        cause: cause.to_string(),
        diagnostics,
    };
    match panic::catch_unwind(AssertUnwindSafe(|| f(ctx))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(failed("callback returned an error", format!("{e:#}"))),
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_default();
            Err(failed("callback panicked", msg))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_file(root: &Path, name: &str, contents: &str) {
        fs::write(root.join(name), contents).unwrap();
    }

    fn copy_action(input: &str, output: &str) -> Action {
        Action::new(
            [input],
            output,
            Operation::callback(|ctx| {
                fs::copy(&ctx.inputs[0], &ctx.output)?;
                Ok(())
            }),
        )
    }

    #[test]
    fn empty_stage_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = RunRecord::default();
        let report = execute_stage(Vec::new(), &mut record, dir.path(), 4).unwrap();
        assert_eq!(report.registered, 0);
        assert_eq!(report.executed, 0);
        assert!(record.is_empty());
    }

    #[test]
    fn callback_success_updates_record() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.txt", "a");
        let mut record = RunRecord::default();

        let report =
            execute_stage(vec![copy_action("a.txt", "b.txt")], &mut record, dir.path(), 2).unwrap();
        assert_eq!(report.executed, 1);
        assert_eq!(report.timings.len(), 1);
        assert!(record.get(Path::new("b.txt")).is_some());
    }

    #[test]
    fn callback_error_is_action_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = RunRecord::default();
        let action = Action::new(
            Vec::<PathBuf>::new(),
            "never.txt",
            Operation::callback(|_| anyhow::bail!("synthesis exploded")),
        );
        let err = execute_stage(vec![action], &mut record, dir.path(), 1).unwrap_err();
        match err {
            RunnerError::ActionFailed { cause, diagnostics, .. } => {
                assert_eq!(cause, "callback returned an error");
                assert!(diagnostics.contains("synthesis exploded"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn callback_panic_is_contained() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = RunRecord::default();
        let action = Action::new(
            Vec::<PathBuf>::new(),
            "never.txt",
            Operation::shared_callback(|_| panic!("boom")),
        );
        let err = execute_stage(vec![action], &mut record, dir.path(), 2).unwrap_err();
        assert!(err.is_action_failure());
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn missing_output_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = RunRecord::default();
        let action = Action::new(
            Vec::<PathBuf>::new(),
            "phantom.o",
            Operation::shared_callback(|_| Ok(())),
        );
        let err = execute_stage(vec![action], &mut record, dir.path(), 2).unwrap_err();
        assert!(matches!(err, RunnerError::OutputMissing { .. }));
        assert!(record.get(Path::new("phantom.o")).is_none());
    }

    #[test]
    fn missing_input_is_reported_before_launch() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = RunRecord::default();
        let err = execute_stage(
            vec![copy_action("absent.txt", "b.txt")],
            &mut record,
            dir.path(),
            1,
        )
        .unwrap_err();
        match err {
            RunnerError::InputUnavailable { output, input } => {
                assert_eq!(output, PathBuf::from("b.txt"));
                assert_eq!(input, PathBuf::from("absent.txt"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn no_launch_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = RunRecord::default();
        let fail = Action::new(
            Vec::<PathBuf>::new(),
            "fail.txt",
            Operation::callback(|_| anyhow::bail!("first")),
        );
        let later = Action::new(
            Vec::<PathBuf>::new(),
            "later.txt",
            Operation::callback(|ctx| {
                fs::write(&ctx.output, "x")?;
                Ok(())
            }),
        );
        assert!(execute_stage(vec![fail, later], &mut record, dir.path(), 1).is_err());
        assert!(!dir.path().join("later.txt").exists());
    }

    #[test]
    fn slowest_sorts_descending() {
        let report = StageReport {
            timings: vec![
                ("a".into(), Duration::from_millis(5)),
                ("b".into(), Duration::from_millis(50)),
                ("c".into(), Duration::from_millis(20)),
            ],
            ..StageReport::default()
        };
        let names: Vec<String> = report.slowest(2).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["b", "c"]);
    }
}
