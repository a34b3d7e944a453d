//! Incremental command runner.
//!
//! Callers register declarative [`Action`]s (inputs, one output, and an
//! [`Operation`] that produces it) into a stage, then call [`Runner::run`].
//! Actions whose inputs and output are unchanged since their last successful
//! run are skipped; the rest execute on a bounded worker pool. Successful
//! runs are fingerprinted into a [`RunRecord`](record::RunRecord) that can be
//! persisted between processes.
//!
//! The runner also keeps an invocation ledger of compiler command lines and
//! exports it as a `compile_commands.json` database.
//!
//! # Usage
//!
//! ```no_run
//! use quark_runner::{Operation, Runner, RunnerOptions};
//!
//! # fn main() -> Result<(), quark_runner::RunnerError> {
//! let mut runner = Runner::new(RunnerOptions::new(".").record_file("build/.quark-record.json"));
//!
//! let argv = ["c++", "-c", "top.cc", "-o", "build/top.o"];
//! runner.record_invocation("top.cc", argv);
//! runner.add_action(["top.cc"], "build/top.o", Operation::process(argv), Default::default())?;
//! runner.write_compile_commands("build/compile_commands.json")?;
//! runner.run()?;
//!
//! runner.run_direct(&["./build/sim"], "simulate")?;
//! runner.finish()
//! # }
//! ```

pub mod action;
pub mod error;
mod executor;
pub mod fingerprint;
pub mod ledger;
pub mod options;
pub mod oracle;
pub mod process;
pub mod record;
mod runner;

pub use action::{Action, ActionContext, ActionOptions, CallbackResult, Operation};
pub use error::RunnerError;
pub use executor::StageReport;
pub use fingerprint::FingerprintStrategy;
pub use ledger::{CompileCommand, InvocationLedger};
pub use options::RunnerOptions;
pub use oracle::{StaleReason, Verdict};
pub use record::RunRecord;
pub use runner::Runner;
