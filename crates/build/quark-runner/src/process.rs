//! External process invocation.
//!
//! Wraps `std::process::Command` for argv-style commands: captured output
//! for cached actions, inherited stdio for direct runs. Exit code 0 is the
//! only success signal.

use std::path::Path;
use std::process::{Command, ExitStatus, Output, Stdio};

use crate::error::RunnerError;

/// A prepared argv invocation.
pub struct ProcessCommand<'a> {
    argv: &'a [String],
    cmd: Command,
}

impl<'a> ProcessCommand<'a> {
    /// Prepare `argv` to run in `workdir`. Returns `None` for an empty argv.
    pub fn new(argv: &'a [String], workdir: &Path) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(workdir);
        Some(Self { argv, cmd })
    }

    /// The program name.
    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    /// Run with stdout/stderr captured.
    pub fn run_captured(&mut self) -> std::io::Result<Output> {
        self.cmd.stdin(Stdio::null()).output()
    }

    /// Run with stdio inherited from this process, streaming output live.
    pub fn run_streamed(&mut self) -> std::io::Result<ExitStatus> {
        self.cmd.status()
    }
}

/// Describe a non-successful exit status, e.g. `exit code 1`.
pub fn describe_status(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("terminated by signal {signal}");
        }
    }
    "terminated abnormally".to_string()
}

/// Join captured stdout and stderr into one diagnostic block.
pub fn collect_diagnostics(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
        (true, true) => String::new(),
        (false, true) => stdout.into_owned(),
        (true, false) => stderr.into_owned(),
        (false, false) => format!("{stdout}{}{stderr}", if stdout.ends_with('\n') { "" } else { "\n" }),
    }
}

/// Spawn `argv` in `workdir` with inherited stdio and fail on a non-zero
/// exit. Used for uncached direct runs.
pub fn run_streamed_checked(argv: &[String], workdir: &Path, step: &str) -> Result<(), RunnerError> {
    let Some(mut cmd) = ProcessCommand::new(argv, workdir) else {
        return Err(RunnerError::DirectRunFailed {
            step: step.to_string(),
            cause: "empty command line".to_string(),
        });
    };
    let status = cmd.run_streamed().map_err(|source| RunnerError::Spawn {
        program: cmd.program().to_string(),
        source,
    })?;
    if status.success() {
        Ok(())
    } else {
        Err(RunnerError::DirectRunFailed {
            step: step.to_string(),
            cause: describe_status(status),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn empty_argv_is_rejected() {
        assert!(ProcessCommand::new(&[], Path::new(".")).is_none());
    }

    #[test]
    fn captures_both_streams() {
        let argv = argv(&["sh", "-c", "echo out; echo err >&2; exit 3"]);
        let output = ProcessCommand::new(&argv, Path::new("."))
            .unwrap()
            .run_captured()
            .unwrap();
        assert_eq!(describe_status(output.status), "exit code 3");
        assert_eq!(collect_diagnostics(&output), "out\nerr\n");
    }

    #[test]
    fn runs_in_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let argv = argv(&["sh", "-c", "echo hi > marker"]);
        let output = ProcessCommand::new(&argv, dir.path())
            .unwrap()
            .run_captured()
            .unwrap();
        assert!(output.status.success());
        assert!(dir.path().join("marker").exists());
    }

    #[test]
    fn streamed_failure_names_step() {
        let err = run_streamed_checked(&argv(&["sh", "-c", "exit 7"]), Path::new("."), "run")
            .unwrap_err();
        assert_eq!(err.to_string(), "step `run` failed (exit code 7)");
    }

    #[test]
    fn streamed_missing_program_is_spawn_error() {
        let err = run_streamed_checked(
            &argv(&["definitely-not-a-real-program-quark"]),
            Path::new("."),
            "run",
        )
        .unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }
}
