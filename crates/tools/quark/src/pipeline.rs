//! Turns a validated plan into runner stages and executes them.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use quark_runner::{Action, Operation, Runner, RunnerOptions};
use walkdir::WalkDir;

use crate::plan::{ActionKind, ActionPlan, Plan, ScanSpec};
use crate::verbose::Timer;

/// Name of the run record inside the build directory.
pub const RECORD_FILE: &str = ".quark-record.json";

/// Name of the compilation database inside the build directory.
pub const COMPILE_DB_FILE: &str = "compile_commands.json";

/// Flags that change how actions are registered.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildFlags {
    pub force: bool,
    pub optimize: bool,
    pub debug: bool,
    /// Worker count, 0 = auto.
    pub jobs: usize,
}

/// Totals across every stage of one build.
#[derive(Debug, Default)]
pub struct BuildSummary {
    pub registered: usize,
    pub executed: usize,
    pub timings: Vec<(String, Duration)>,
}

impl BuildSummary {
    /// The `n` slowest executed actions, slowest first.
    pub fn slowest(&self, n: usize) -> Vec<(String, Duration)> {
        let mut sorted = self.timings.clone();
        sorted.sort_by(|a, b| b.1.cmp(&a.1));
        sorted.truncate(n);
        sorted
    }
}

/// Create a runner for `plan` rooted at `root`, with the run record kept in
/// the plan's build directory.
pub fn runner_for(plan: &Plan, root: &Path, flags: BuildFlags) -> Runner {
    let options = RunnerOptions::new(root)
        .jobs(flags.jobs)
        .fingerprint(plan.project.fingerprint)
        .record_file(plan.project.build_dir.join(RECORD_FILE));
    Runner::new(options)
}

/// Execute every stage of `plan` in declaration order.
///
/// The compilation database is written before the first stage that
/// compiles anything, so editors see it even when compilation fails.
pub fn build(plan: &Plan, runner: &mut Runner, flags: BuildFlags) -> Result<BuildSummary> {
    let root = runner.root().to_path_buf();
    let mut summary = BuildSummary::default();

    for stage in &plan.stages {
        for action in &stage.actions {
            if let (Some(file), Some(ActionKind::Command(argv))) = (&action.compile_file, action.kind()) {
                runner.record_invocation(file.clone(), command_line(argv, action, flags));
            }
        }
    }
    let mut db_written = !plan.has_compile_actions();

    for stage in &plan.stages {
        let _t = Timer::start(format!("stage {}", stage.name));

        if !db_written && stage.actions.iter().any(|a| a.compile_file.is_some()) {
            let db = plan.project.build_dir.join(COMPILE_DB_FILE);
            runner
                .write_compile_commands(&db)
                .context("failed to write compilation database")?;
            tracing::debug!(path = %db.display(), entries = runner.ledger().len(), "wrote compilation database");
            db_written = true;
        }

        for action in &stage.actions {
            let registered = register(&root, action, flags)
                .with_context(|| format!("stage '{}'", stage.name))?;
            runner.add(registered)?;
        }

        let report = runner
            .run()
            .with_context(|| format!("stage '{}' failed", stage.name))?;
        summary.registered += report.registered;
        summary.executed += report.executed;
        summary.timings.extend(report.timings);
    }

    Ok(summary)
}

/// Full argv for a command action under `flags`.
fn command_line(argv: &[String], action: &ActionPlan, flags: BuildFlags) -> Vec<String> {
    let mut line = argv.to_vec();
    if flags.optimize {
        line.extend(action.optimize_args.iter().cloned());
    }
    if flags.debug {
        line.extend(action.debug_args.iter().cloned());
    }
    line
}

/// Build the runner action for one plan entry.
fn register(root: &Path, plan: &ActionPlan, flags: BuildFlags) -> Result<Action> {
    // Tools rarely create their own output directories.
    if let Some(parent) = root.join(&plan.output).parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut inputs = plan.inputs.clone();
    for scan in &plan.scan {
        inputs.extend(scan_inputs(root, scan)?);
    }

    let mut force = flags.force;
    let (operation, label) = match plan.kind() {
        Some(ActionKind::Command(argv)) => {
            (Operation::Process(command_line(argv, plan, flags)), None)
        }
        Some(ActionKind::Copy(src)) => {
            inputs.push(src.to_path_buf());
            let src = root.join(src);
            let op = Operation::shared_callback(move |ctx| {
                fs::copy(&src, &ctx.output)
                    .with_context(|| format!("failed to copy {}", src.display()))?;
                Ok(())
            });
            (op, Some(format!("copy -> {}", plan.output.display())))
        }
        Some(ActionKind::Write(text)) => {
            // Nothing is declared as input, so a content change must force it.
            force |= content_differs(&root.join(&plan.output), text);
            let text = text.to_string();
            let op = Operation::shared_callback(move |ctx| {
                fs::write(&ctx.output, &text)
                    .with_context(|| format!("failed to write {}", ctx.output.display()))?;
                Ok(())
            });
            (op, Some(format!("write -> {}", plan.output.display())))
        }
        None => anyhow::bail!(
            "action '{}' must set exactly one of command, copy, write",
            plan.output.display()
        ),
    };

    let mut action = Action::new(inputs, &plan.output, operation).force(force);
    if let Some(dir) = &plan.workdir {
        action = action.workdir(dir);
    }
    if let Some(label) = label {
        action = action.label(label);
    }
    Ok(action)
}

/// Whether `path` is missing or holds something other than `text`.
fn content_differs(path: &Path, text: &str) -> bool {
    fs::read(path).map_or(true, |existing| existing != text.as_bytes())
}

/// Files under `scan.dir` whose extension is in `scan.extensions` (any file
/// when the list is empty), as paths relative to `root`, sorted.
fn scan_inputs(root: &Path, scan: &ScanSpec) -> Result<Vec<PathBuf>> {
    let dir = root.join(&scan.dir);
    let mut found = Vec::new();
    for entry in WalkDir::new(&dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to scan {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let wanted = scan.extensions.is_empty()
            || path
                .extension()
                .is_some_and(|ext| scan.extensions.iter().any(|e| ext == e.as_str()));
        if wanted {
            found.push(path.strip_prefix(root).unwrap_or(path).to_path_buf());
        }
    }
    Ok(found)
}
