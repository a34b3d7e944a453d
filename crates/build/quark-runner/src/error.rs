//! Error taxonomy for registration and stage execution.
//!
//! Every variant is terminal for the stage that produced it. Nothing is
//! retried; the driver decides how to print diagnostics and which exit code
//! to use.

use std::path::PathBuf;

/// Errors raised by the runner.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Two actions in the same stage declared the same output.
    #[error("output `{}` is already claimed by another action in this stage", output.display())]
    DuplicateOutput {
        /// The contested output path.
        output: PathBuf,
    },

    /// A process action was registered without a program.
    #[error("action for `{}` has an empty command line", output.display())]
    EmptyCommand {
        /// Output of the offending action.
        output: PathBuf,
    },

    /// A declared input does not exist when the action is about to run.
    #[error("input `{}` of `{}` does not exist", input.display(), output.display())]
    InputUnavailable {
        /// Output of the action that needed the input.
        output: PathBuf,
        /// The missing input path.
        input: PathBuf,
    },

    /// The action ran and failed: non-zero exit, spawn failure, or callback error.
    #[error("{action} failed ({cause}){}", render_diagnostics(diagnostics))]
    ActionFailed {
        /// Human-readable identity of the action.
        action: String,
        /// Declared output of the action.
        output: PathBuf,
        /// Short description of why it failed, e.g. `exit code 1`.
        cause: String,
        /// Captured stdout/stderr, or the callback's error chain.
        diagnostics: String,
    },

    /// The action reported success but its declared output is absent.
    #[error("{action} reported success but did not produce `{}`", output.display())]
    OutputMissing {
        /// Human-readable identity of the action.
        action: String,
        /// The output that was expected.
        output: PathBuf,
    },

    /// A direct-run step exited unsuccessfully.
    #[error("step `{step}` failed ({cause})")]
    DirectRunFailed {
        /// Name of the step, as given by the caller.
        step: String,
        /// Exit status description.
        cause: String,
    },

    /// A direct-run process could not be started.
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        /// Program that could not be started.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The persisted run record could not be read or written.
    #[error("run record {}: {reason}", path.display())]
    Record {
        /// Path of the record file.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// The compilation database could not be written.
    #[error("failed to write compilation database {}: {reason}", path.display())]
    CompileDb {
        /// Destination path.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// Worker threads went away before reporting all results.
    #[error("worker threads terminated unexpectedly")]
    WorkerLost,
}

impl RunnerError {
    /// Returns `true` for failures of an executed action, including a
    /// missing output after a successful exit.
    pub fn is_action_failure(&self) -> bool {
        matches!(self, Self::ActionFailed { .. } | Self::OutputMissing { .. })
    }

    /// Output path of the action this error concerns, if any.
    pub fn output(&self) -> Option<&std::path::Path> {
        match self {
            Self::DuplicateOutput { output }
            | Self::EmptyCommand { output }
            | Self::InputUnavailable { output, .. }
            | Self::ActionFailed { output, .. }
            | Self::OutputMissing { output, .. } => Some(output),
            _ => None,
        }
    }
}

fn render_diagnostics(diagnostics: &str) -> String {
    let trimmed = diagnostics.trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(":\n{trimmed}")
    }
}
