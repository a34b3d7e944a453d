//! Build plan parsing and validation.
//!
//! Parses `quark.toml`: a `[project]` table, an ordered list of `[[stage]]`
//! tables each holding `[[stage.action]]` entries, and an optional `[run]`
//! step executed after the build.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail, ensure};
use quark_runner::FingerprintStrategy;
use serde::Deserialize;

/// File name searched for when no plan is given on the command line.
pub const PLAN_FILE: &str = "quark.toml";

/// Top-level plan loaded from `quark.toml`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    pub project: ProjectMeta,
    #[serde(default, rename = "stage")]
    pub stages: Vec<StagePlan>,
    #[serde(default)]
    pub run: Option<RunStep>,
}

/// `[project]` section.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectMeta {
    pub name: String,
    /// Holds the run record and the compilation database.
    #[serde(default = "default_build_dir", rename = "build-dir")]
    pub build_dir: PathBuf,
    #[serde(default)]
    pub fingerprint: FingerprintStrategy,
}

fn default_build_dir() -> PathBuf {
    PathBuf::from("build")
}

/// One `[[stage]]`: a set of actions with no ordering among them.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StagePlan {
    pub name: String,
    #[serde(default, rename = "action")]
    pub actions: Vec<ActionPlan>,
}

/// One `[[stage.action]]` entry.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ActionPlan {
    pub output: PathBuf,
    #[serde(default)]
    pub inputs: Vec<PathBuf>,
    /// External program and arguments.
    pub command: Option<Vec<String>>,
    /// Copy this file to the output in-process.
    pub copy: Option<PathBuf>,
    /// Write these literal contents to the output in-process.
    pub write: Option<String>,
    /// Source file to record in the compilation database.
    pub compile_file: Option<PathBuf>,
    #[serde(default)]
    pub optimize_args: Vec<String>,
    #[serde(default)]
    pub debug_args: Vec<String>,
    pub workdir: Option<PathBuf>,
    /// Directories scanned for additional inputs.
    #[serde(default)]
    pub scan: Vec<ScanSpec>,
}

/// Inputs discovered by walking `dir` for files with one of `extensions`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanSpec {
    pub dir: PathBuf,
    #[serde(default)]
    pub extensions: Vec<String>,
}

/// `[run]` section: an uncached step executed after every stage.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunStep {
    #[serde(default = "default_step_name")]
    pub step: String,
    pub command: Vec<String>,
}

fn default_step_name() -> String {
    "run".into()
}

/// What an action does, once validated.
#[derive(Debug, Clone, Copy)]
pub enum ActionKind<'a> {
    Command(&'a [String]),
    Copy(&'a Path),
    Write(&'a str),
}

impl ActionPlan {
    /// The single operation this action declares. Only meaningful after
    /// [`Plan::validate`].
    pub fn kind(&self) -> Option<ActionKind<'_>> {
        match (&self.command, &self.copy, &self.write) {
            (Some(argv), None, None) => Some(ActionKind::Command(argv)),
            (None, Some(src), None) => Some(ActionKind::Copy(src)),
            (None, None, Some(text)) => Some(ActionKind::Write(text)),
            _ => None,
        }
    }
}

impl Plan {
    /// Parse a plan from TOML text.
    pub fn parse(text: &str) -> Result<Self> {
        let plan: Self = toml::from_str(text)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Read and validate the plan at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid plan {}", path.display()))
    }

    /// Check the plan for structural errors before anything runs.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.project.name.is_empty(), "project name is required");

        let mut stage_names = HashSet::new();
        for stage in &self.stages {
            ensure!(!stage.name.is_empty(), "stage name must not be empty");
            ensure!(
                stage_names.insert(stage.name.as_str()),
                "duplicate stage '{}'",
                stage.name
            );
            validate_stage(stage)?;
        }

        if let Some(run) = &self.run {
            ensure!(!run.command.is_empty(), "run step '{}' has an empty command", run.step);
        }
        Ok(())
    }

    /// Whether any action records a compilation database entry.
    pub fn has_compile_actions(&self) -> bool {
        self.stages
            .iter()
            .flat_map(|s| &s.actions)
            .any(|a| a.compile_file.is_some())
    }
}

fn validate_stage(stage: &StagePlan) -> Result<()> {
    let mut outputs = HashSet::new();
    for action in &stage.actions {
        let out = action.output.display();
        ensure!(
            !action.output.as_os_str().is_empty(),
            "stage '{}' has an action with an empty output",
            stage.name
        );
        let declared = [
            action.command.is_some(),
            action.copy.is_some(),
            action.write.is_some(),
        ]
        .into_iter()
        .filter(|b| *b)
        .count();
        if declared != 1 {
            bail!(
                "action '{out}' in stage '{}' must set exactly one of command, copy, write (found {declared})",
                stage.name
            );
        }
        if let Some(argv) = &action.command {
            ensure!(!argv.is_empty(), "action '{out}' has an empty command");
        }
        if action.command.is_none() {
            ensure!(
                action.compile_file.is_none()
                    && action.optimize_args.is_empty()
                    && action.debug_args.is_empty(),
                "action '{out}' sets compiler options but has no command"
            );
        }
        ensure!(
            outputs.insert(&action.output),
            "output '{out}' is produced twice in stage '{}'",
            stage.name
        );
    }
    Ok(())
}

/// Find the plan: the explicit path if given, otherwise the nearest
/// `quark.toml` in the current directory or any parent.
pub fn find_plan(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        ensure!(path.is_file(), "plan file {} does not exist", path.display());
        return Ok(path.to_path_buf());
    }
    let mut dir = std::env::current_dir()?;
    loop {
        let candidate = dir.join(PLAN_FILE);
        if candidate.is_file() {
            return Ok(candidate);
        }
        if !dir.pop() {
            bail!("could not find {PLAN_FILE} in any parent directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
        [project]
        name = "blinky"
        fingerprint = "hybrid"

        [[stage]]
        name = "generate"

        [[stage.action]]
        output = "build/top.ys"
        write = "read_rtlil build/top.il\n"

        [[stage]]
        name = "compile"

        [[stage.action]]
        output = "build/top.o"
        inputs = ["build/top.cc"]
        command = ["c++", "-c", "build/top.cc", "-o", "build/top.o"]
        compile-file = "build/top.cc"
        optimize-args = ["-O3"]
        debug-args = ["-g"]
        scan = [{ dir = "include", extensions = ["h"] }]

        [[stage.action]]
        output = "build/sim"
        copy = "build/a.out"

        [run]
        command = ["build/sim"]
    "#;

    #[test]
    fn parses_full_plan() {
        let plan = Plan::parse(EXAMPLE).unwrap();
        assert_eq!(plan.project.name, "blinky");
        assert_eq!(plan.project.build_dir, PathBuf::from("build"));
        assert_eq!(plan.project.fingerprint, FingerprintStrategy::Hybrid);
        assert_eq!(plan.stages.len(), 2);
        assert_eq!(plan.stages[0].actions.len() + plan.stages[1].actions.len(), 3);
        assert!(plan.has_compile_actions());

        let compile = &plan.stages[1].actions[0];
        assert!(matches!(compile.kind(), Some(ActionKind::Command(argv)) if argv[0] == "c++"));
        assert_eq!(compile.optimize_args, ["-O3"]);
        assert_eq!(compile.scan[0].extensions, ["h"]);
        assert!(matches!(plan.stages[0].actions[0].kind(), Some(ActionKind::Write(_))));
        assert!(matches!(plan.stages[1].actions[1].kind(), Some(ActionKind::Copy(_))));

        let run = plan.run.unwrap();
        assert_eq!(run.step, "run");
        assert_eq!(run.command, ["build/sim"]);
    }

    #[test]
    fn defaults_apply() {
        let plan = Plan::parse("[project]\nname = \"p\"\n").unwrap();
        assert_eq!(plan.project.fingerprint, FingerprintStrategy::ContentHash);
        assert!(plan.stages.is_empty());
        assert!(plan.run.is_none());
    }

    #[test]
    fn empty_project_name() {
        let err = Plan::parse("[project]\nname = \"\"\n").unwrap_err();
        assert!(err.to_string().contains("project name is required"));
    }

    #[test]
    fn duplicate_stage_names() {
        let text = r#"
            [project]
            name = "p"
            [[stage]]
            name = "a"
            [[stage]]
            name = "a"
        "#;
        let err = Plan::parse(text).unwrap_err();
        assert!(err.to_string().contains("duplicate stage 'a'"));
    }

    #[test]
    fn action_needs_exactly_one_operation() {
        let text = r#"
            [project]
            name = "p"
            [[stage]]
            name = "a"
            [[stage.action]]
            output = "x"
            command = ["true"]
            write = "x"
        "#;
        let err = Plan::parse(text).unwrap_err();
        assert!(err.to_string().contains("exactly one of command, copy, write"));

        let text = r#"
            [project]
            name = "p"
            [[stage]]
            name = "a"
            [[stage.action]]
            output = "x"
        "#;
        assert!(Plan::parse(text).is_err());
    }

    #[test]
    fn empty_command() {
        let text = r#"
            [project]
            name = "p"
            [[stage]]
            name = "a"
            [[stage.action]]
            output = "x"
            command = []
        "#;
        let err = Plan::parse(text).unwrap_err();
        assert!(err.to_string().contains("empty command"));
    }

    #[test]
    fn duplicate_outputs_in_stage() {
        let text = r#"
            [project]
            name = "p"
            [[stage]]
            name = "a"
            [[stage.action]]
            output = "x"
            write = "1"
            [[stage.action]]
            output = "x"
            write = "2"
        "#;
        let err = Plan::parse(text).unwrap_err();
        assert!(err.to_string().contains("produced twice"));
    }

    #[test]
    fn compiler_options_require_command() {
        let text = r#"
            [project]
            name = "p"
            [[stage]]
            name = "a"
            [[stage.action]]
            output = "x"
            write = "1"
            optimize-args = ["-O2"]
        "#;
        let err = Plan::parse(text).unwrap_err();
        assert!(err.to_string().contains("compiler options"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Plan::parse("[project]\nname = \"p\"\nbogus = 1\n").unwrap_err();
        assert!(format!("{err:#}").contains("bogus"));
    }

    #[test]
    fn bad_fingerprint_name() {
        assert!(Plan::parse("[project]\nname = \"p\"\nfingerprint = \"md5\"\n").is_err());
    }

    #[test]
    fn explicit_plan_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join(PLAN_FILE);
        assert!(find_plan(Some(&missing)).is_err());

        std::fs::write(&missing, "[project]\nname = \"p\"\n").unwrap();
        assert_eq!(find_plan(Some(&missing)).unwrap(), missing);
    }
}
