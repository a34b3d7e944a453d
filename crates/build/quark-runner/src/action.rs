//! Declarative build actions.
//!
//! An [`Action`] names the files it reads, the single file it produces, and
//! the [`Operation`] that produces it. Actions are registered into the
//! current stage of a [`Runner`](crate::Runner) and consumed by `run()`.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Result type returned by in-process callbacks.
pub type CallbackResult = anyhow::Result<()>;

/// A callback that must run on the runner's control thread.
pub type Callback = Box<dyn FnOnce(&ActionContext) -> CallbackResult>;

/// A callback that may run on a worker thread alongside other actions.
pub type SharedCallback = Box<dyn FnOnce(&ActionContext) -> CallbackResult + Send>;

/// What an action does to produce its output.
pub enum Operation {
    /// Spawn an external program. The first element is the program name,
    /// the rest are its arguments in order.
    Process(Vec<String>),
    /// Invoke an in-process callback on the control thread.
    Callback(Callback),
    /// Invoke an in-process callback that is safe to run concurrently.
    SharedCallback(SharedCallback),
}

impl Operation {
    /// Build a process operation from an argv.
    pub fn process<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Process(argv.into_iter().map(Into::into).collect())
    }

    /// Build a control-thread callback operation.
    pub fn callback(f: impl FnOnce(&ActionContext) -> CallbackResult + 'static) -> Self {
        Self::Callback(Box::new(f))
    }

    /// Build a callback operation that may run on a worker thread.
    pub fn shared_callback(
        f: impl FnOnce(&ActionContext) -> CallbackResult + Send + 'static,
    ) -> Self {
        Self::SharedCallback(Box::new(f))
    }

    /// The argv of a process operation.
    pub fn argv(&self) -> Option<&[String]> {
        match self {
            Self::Process(argv) => Some(argv),
            _ => None,
        }
    }

    /// Whether the executor may hand this operation to a worker thread.
    pub fn is_concurrent(&self) -> bool {
        !matches!(self, Self::Callback(_))
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process(argv) => f.debug_tuple("Process").field(argv).finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
            Self::SharedCallback(_) => f.write_str("SharedCallback(..)"),
        }
    }
}

/// Per-action registration options.
#[derive(Debug, Clone, Default)]
pub struct ActionOptions {
    /// Execution directory; relative paths resolve against the runner root.
    pub workdir: Option<PathBuf>,
    /// Skip the validity oracle and always execute.
    pub force: bool,
    /// Name used in logs and errors.
    pub label: Option<String>,
}

/// Paths handed to a callback when it runs.
///
/// All paths are absolute: the runner root is made absolute when the runner
/// is created and everything else resolves against it.
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// The runner root.
    pub root: PathBuf,
    /// Directory the action executes in.
    pub workdir: PathBuf,
    /// Declared inputs.
    pub inputs: Vec<PathBuf>,
    /// Declared output.
    pub output: PathBuf,
}

/// One declarative build step.
#[derive(Debug)]
pub struct Action {
    pub(crate) inputs: BTreeSet<PathBuf>,
    pub(crate) output: PathBuf,
    pub(crate) operation: Operation,
    pub(crate) options: ActionOptions,
}

impl Action {
    /// Create an action producing `output` from `inputs`.
    pub fn new<I, P>(inputs: I, output: impl Into<PathBuf>, operation: Operation) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            inputs: inputs.into_iter().map(Into::into).collect(),
            output: output.into(),
            operation,
            options: ActionOptions::default(),
        }
    }

    /// Replace the registration options.
    #[must_use]
    pub fn with_options(mut self, options: ActionOptions) -> Self {
        self.options = options;
        self
    }

    /// Execute in `dir` instead of the runner root.
    #[must_use]
    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.workdir = Some(dir.into());
        self
    }

    /// Bypass the cache for this action.
    #[must_use]
    pub fn force(mut self, force: bool) -> Self {
        self.options.force = force;
        self
    }

    /// Set the name used in logs and errors.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.options.label = Some(label.into());
        self
    }

    /// Declared inputs, in sorted order.
    pub fn inputs(&self) -> impl Iterator<Item = &Path> {
        self.inputs.iter().map(PathBuf::as_path)
    }

    /// Declared output.
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// The operation that produces the output.
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    /// Registration options.
    pub fn options(&self) -> &ActionOptions {
        &self.options
    }

    /// Human-readable identity: the label if set, otherwise the program (or
    /// `callback`) followed by the output path.
    pub fn describe(&self) -> String {
        if let Some(label) = &self.options.label {
            return label.clone();
        }
        let what = match &self.operation {
            Operation::Process(argv) => argv.first().map_or("<empty>", String::as_str),
            Operation::Callback(_) | Operation::SharedCallback(_) => "callback",
        };
        format!("{what} -> {}", self.output.display())
    }
}
