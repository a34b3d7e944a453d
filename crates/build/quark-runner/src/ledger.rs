//! Invocation ledger and compilation database export.
//!
//! Remembers the exact argv used to compile each source file, in the order
//! the files were first recorded, and renders it as a `compile_commands.json`
//! array consumed by clangd and similar tools.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::RunnerError;

/// A single entry in the compilation database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompileCommand {
    /// Working directory the command is interpreted in.
    pub directory: PathBuf,
    /// Source file the command compiles.
    pub file: PathBuf,
    /// Full argv, program first.
    pub arguments: Vec<String>,
}

/// Insertion-ordered map of source file to command line.
#[derive(Debug, Clone, Default)]
pub struct InvocationLedger {
    entries: Vec<(PathBuf, Vec<String>)>,
}

impl InvocationLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the argv for `file`. Re-recording a file replaces its
    /// arguments but keeps its original position.
    pub fn record(&mut self, file: impl Into<PathBuf>, arguments: Vec<String>) {
        let file = file.into();
        match self.entries.iter_mut().find(|(f, _)| *f == file) {
            Some((_, args)) => *args = arguments,
            None => self.entries.push((file, arguments)),
        }
    }

    /// The recorded argv for `file`.
    pub fn get(&self, file: &Path) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(f, _)| f == file)
            .map(|(_, args)| args.as_slice())
    }

    /// Number of recorded files.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Export every entry with `directory` as its working directory.
    pub fn export(&self, directory: &Path) -> Vec<CompileCommand> {
        self.entries
            .iter()
            .map(|(file, arguments)| CompileCommand {
                directory: directory.to_path_buf(),
                file: file.clone(),
                arguments: arguments.clone(),
            })
            .collect()
    }

    /// Render the compilation database as pretty-printed JSON.
    pub fn to_json(&self, directory: &Path) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.export(directory))
    }

    /// Write the compilation database to `path`.
    pub fn write(&self, directory: &Path, path: &Path) -> Result<(), RunnerError> {
        let fail = |reason: String| RunnerError::CompileDb {
            path: path.to_path_buf(),
            reason,
        };
        let json = self.to_json(directory).map_err(|e| fail(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| fail(e.to_string()))?;
        }
        fs::write(path, json).map_err(|e| fail(e.to_string()))
    }
}
