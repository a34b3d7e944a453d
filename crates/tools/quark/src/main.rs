//! quark: plan-driven incremental build runner.
//!
//! Loads `quark.toml`, registers each stage's actions with the runner,
//! executes the stages in order (skipping anything whose inputs and output
//! are unchanged), writes `compile_commands.json`, and finally runs the
//! `[run]` step unless `--compile` is given.
//!
//! Pipeline: find plan → validate → stages → compile database → run step.

mod cli;
mod pipeline;
mod plan;
mod verbose;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

use crate::pipeline::BuildFlags;
use crate::plan::Plan;
use crate::verbose::vprintln;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    verbose::init(cli.quiet, cli.verbose);

    let plan_path = plan::find_plan(cli.plan.as_deref())?;
    let root = plan_root(&plan_path)?;
    let plan = {
        let _t = verbose::Timer::start("plan loading");
        Plan::load(&plan_path)?
    };

    if cli.clean {
        return cmd_clean(&root, &plan);
    }
    cmd_build(&cli, &root, &plan)
}

/// Directory containing the plan; every relative path resolves against it.
fn plan_root(plan_path: &Path) -> Result<PathBuf> {
    let dir = match plan_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    dir.canonicalize()
        .with_context(|| format!("failed to resolve {}", dir.display()))
}

/// Remove the build directory.
fn cmd_clean(root: &Path, plan: &Plan) -> Result<()> {
    let build_dir = root.join(&plan.project.build_dir);
    if build_dir.exists() {
        std::fs::remove_dir_all(&build_dir)
            .with_context(|| format!("failed to remove {}", build_dir.display()))?;
        println!("Removed {}", build_dir.display());
    } else {
        println!("Nothing to clean.");
    }
    Ok(())
}

/// Build every stage, then run the `[run]` step unless `--compile`.
fn cmd_build(cli: &cli::Cli, root: &Path, plan: &Plan) -> Result<()> {
    let flags = BuildFlags {
        force: cli.force,
        optimize: cli.optimize,
        debug: cli.debug,
        jobs: cli.jobs.unwrap_or(0),
    };
    tracing::debug!(
        project = %plan.project.name,
        root = %root.display(),
        stages = plan.stages.len(),
        "loaded plan"
    );

    let mut runner = pipeline::runner_for(plan, root, flags);
    let summary = pipeline::build(plan, &mut runner, flags)?;

    println!(
        "Finished: {} of {} actions executed",
        summary.executed, summary.registered
    );
    for (label, elapsed) in summary.slowest(5) {
        vprintln!("  {elapsed:>10.1?}  {label}");
    }

    if !cli.compile {
        if let Some(run) = &plan.run {
            let mut argv = run.command.clone();
            argv.extend(cli.run_args.iter().cloned());
            runner.run_direct(&argv, &run.step)?;
        }
    }

    runner.finish()?;
    Ok(())
}
