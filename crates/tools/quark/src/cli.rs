//! Command-line interface definitions for quark.

use std::path::PathBuf;

use clap::Parser;

/// Incremental plan-driven build runner.
#[derive(Parser)]
#[command(name = "quark", version, about)]
pub struct Cli {
    /// Build plan to load (default: nearest `quark.toml` in this or a parent directory).
    #[arg(long, value_name = "PATH")]
    pub plan: Option<PathBuf>,

    /// Force every action to run, bypassing the run record.
    #[arg(long, short = 'f')]
    pub force: bool,

    /// Build only; skip the `[run]` step.
    #[arg(long, short = 'c')]
    pub compile: bool,

    /// Append each action's `optimize-args`.
    #[arg(long, short = 'O')]
    pub optimize: bool,

    /// Append each action's `debug-args`.
    #[arg(long, short = 'd')]
    pub debug: bool,

    /// Maximum number of parallel workers (0 or omitted = auto-detect from CPU count).
    #[arg(long, short = 'j')]
    pub jobs: Option<usize>,

    /// Suppress per-action output; show only errors and the final summary.
    #[arg(long, short = 'q', conflicts_with = "verbose")]
    pub quiet: bool,

    /// Enable verbose output with stale reasons and timings.
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Remove the build directory and exit.
    #[arg(long, conflicts_with_all = ["force", "compile"])]
    pub clean: bool,

    /// Extra arguments appended to the run step after `--`.
    #[arg(last = true)]
    pub run_args: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn trailing_args_are_collected() {
        let cli = Cli::try_parse_from(["quark", "-O", "-j", "3", "--", "+trace", "-n"]).unwrap();
        assert!(cli.optimize);
        assert_eq!(cli.jobs, Some(3));
        assert_eq!(cli.run_args, ["+trace", "-n"]);
    }

    #[test]
    fn quiet_and_verbose_conflict() {
        assert!(Cli::try_parse_from(["quark", "-q", "-v"]).is_err());
    }
}
