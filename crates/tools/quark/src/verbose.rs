//! Output verbosity and log setup.
//!
//! Three output levels controlled by CLI flags:
//! - **Quiet** (`-q`): warnings, errors, and the final summary
//! - **Default** (no flag): one "Running" line per executed action
//! - **Verbose** (`-v`): also skip lines with stale reasons and phase timings
//!
//! The level picks the default `tracing` filter; `RUST_LOG` still overrides.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// Output verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Warnings, errors, summary.
    Quiet = 0,
    /// Per-action progress.
    Default = 1,
    /// Everything.
    Verbose = 2,
}

impl Verbosity {
    /// Pick the level from the `-q` / `-v` flags.
    pub fn from_flags(quiet: bool, verbose: bool) -> Self {
        if quiet {
            Self::Quiet
        } else if verbose {
            Self::Verbose
        } else {
            Self::Default
        }
    }

    /// The most detailed log level shown at this verbosity.
    pub fn level_filter(self) -> LevelFilter {
        match self {
            Self::Quiet => LevelFilter::WARN,
            Self::Default => LevelFilter::INFO,
            Self::Verbose => LevelFilter::DEBUG,
        }
    }
}

/// Global verbosity level, set once at startup.
static VERBOSITY: AtomicU8 = AtomicU8::new(Verbosity::Default as u8);

/// Set the verbosity for this process and install the log subscriber.
pub fn init(quiet: bool, verbose: bool) {
    let level = Verbosity::from_flags(quiet, verbose);
    VERBOSITY.store(level as u8, Ordering::Relaxed);

    let filter = EnvFilter::builder()
        .with_default_directive(level.level_filter().into())
        .from_env_lossy();
    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .try_init();
}

/// Returns the current verbosity level.
pub fn verbosity() -> Verbosity {
    match VERBOSITY.load(Ordering::Relaxed) {
        0 => Verbosity::Quiet,
        2 => Verbosity::Verbose,
        _ => Verbosity::Default,
    }
}

/// Returns `true` if verbose mode is active.
pub fn is_verbose() -> bool {
    verbosity() == Verbosity::Verbose
}

/// Print a message only when verbose mode is enabled.
macro_rules! vprintln {
    ($($arg:tt)*) => {
        if $crate::verbose::is_verbose() {
            println!($($arg)*);
        }
    };
}

pub(crate) use vprintln;

/// RAII timer that logs the elapsed duration of a phase on drop.
///
/// ```ignore
/// let _t = Timer::start("stage compile");
/// // ... work ...
/// // logs "stage compile: 42ms" at debug level on drop
/// ```
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    /// Begin timing a labeled phase.
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        tracing::debug!("{}: {:.1?}", self.label, self.start.elapsed());
    }
}
