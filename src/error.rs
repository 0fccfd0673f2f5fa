//! Error types.
//!
//! A `HarnessError` means the test environment itself is broken: the script
//! under test never got a fair chance to run. A script that exits non-zero is
//! not an error, it is an [`ExecutionResult`](crate::runner::ExecutionResult).

use std::path::PathBuf;
use std::time::Duration;

/// Result type used across the harness.
pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

/// Failures that abort a test before any assertion is made.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Failed to create the per-test scratch directory.
    #[error("failed to create scratch directory: {0}")]
    Scratch(#[source] std::io::Error),

    /// A named library fragment could not be read.
    #[error("failed to read script fragment {}: {source}", path.display())]
    Fragment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A mock delegating to the real program could not find it.
    #[error("cannot find executable {name}: {source}")]
    ExecutableNotFound {
        name: String,
        #[source]
        source: which::Error,
    },

    /// Failed to write a generated file (script or mock binary).
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The shell interpreter could not be started.
    #[error("failed to start {shell}: {source}")]
    Spawn {
        shell: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the interpreter or collecting its output failed.
    #[error("failed to wait for {shell}: {source}")]
    Wait {
        shell: String,
        #[source]
        source: std::io::Error,
    },

    /// The script ran past the configured watchdog.
    #[error("script did not finish within {0:?}")]
    Timeout(Duration),

    /// A prefetch warm-up failed; the streams of the failed run are attached.
    #[error(
        "prefetch of {tool} failed: {message}\n\
         ───── BEGIN STDOUT ─────\n{stdout}\n────── END STDOUT ──────\n\
         ───── BEGIN STDERR ─────\n{stderr}\n────── END STDERR ──────"
    )]
    Prefetch {
        tool: String,
        message: String,
        stdout: String,
        stderr: String,
    },

    /// A table entry that cannot be turned into a scriptlet.
    #[error("invalid table: {0}")]
    InvalidTable(String),

    /// A preset name is not present in the registry.
    #[error("unknown preset: {0}")]
    UnknownPreset(String),

    /// An invalid regular expression in a check or stderr filter.
    #[error("invalid regex {pattern:?}: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

impl HarnessError {
    /// Whether this error was caused by the watchdog.
    pub fn is_timeout(&self) -> bool {
        matches!(self, HarnessError::Timeout(_))
    }
}
