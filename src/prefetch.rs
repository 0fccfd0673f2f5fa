//! Warm-up of network-fetched helper tools.
//!
//! Some library functions shell out to tools that are downloaded on first use
//! (`go run <module>@<version>` and friends). Downloading while a test runs
//! would pollute its captured streams, so such scriptlets carry a
//! [`Prefetcher`] that runs once, before any script using the tool executes.
//!
//! Warm-ups are keyed: concurrent tests asking for the same key wait for one
//! shared run and all observe its outcome, success or failure.

use crate::config::{HarnessConfig, PrefetchStep};
use crate::error::{HarnessError, Result};
use crate::mock::find_executable;
use std::collections::HashMap;
use std::process::{Command, Stdio};
use std::sync::{Arc, LazyLock, Mutex, OnceLock, PoisonError};
use tracing::{debug, info};

/// A tool warm-up.
pub trait Prefetcher: Send + Sync {
    /// Identifies the tool. Warm-ups with equal keys run at most once per process.
    fn key(&self) -> String;

    /// Performs the warm-up. Output is discarded unless it fails.
    fn warm_up(&self, config: &HarnessConfig) -> std::result::Result<(), WarmUpFailure>;
}

/// Why a warm-up failed, with the streams of the failed run.
#[derive(Debug, Clone, Default)]
pub struct WarmUpFailure {
    pub message: String,
    pub stdout: String,
    pub stderr: String,
}

impl WarmUpFailure {
    fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

type Outcome = std::result::Result<(), WarmUpFailure>;

static WARMED: LazyLock<Mutex<HashMap<String, Arc<OnceLock<Outcome>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Runs `prefetcher` unless a warm-up with the same key already ran.
///
/// A concurrent caller with the same key blocks until the first run finishes.
pub fn prefetch(prefetcher: &dyn Prefetcher, config: &HarnessConfig) -> Result<()> {
    let key = prefetcher.key();
    let slot = {
        let mut warmed = WARMED.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(warmed.entry(key.clone()).or_default())
    };

    let outcome = slot.get_or_init(|| {
        info!(tool = %key, "prefetching");
        prefetcher.warm_up(config)
    });

    outcome.clone().map_err(|f| HarnessError::Prefetch {
        tool: key,
        message: f.message,
        stdout: f.stdout,
        stderr: f.stderr,
    })
}

/// Warms a tool by running a command in the repository root.
#[derive(Debug, Clone)]
pub struct CommandPrefetcher {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl CommandPrefetcher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// `go run <tool> --help`, which downloads and builds the tool.
    pub fn go_run_help(tool: impl Into<String>) -> Self {
        Self::new("go")
            .args(["run".to_string(), tool.into(), "--help".to_string()])
            .env("GOTOOLCHAIN", "auto")
    }
}

impl From<&PrefetchStep> for CommandPrefetcher {
    fn from(step: &PrefetchStep) -> Self {
        let mut prefetcher = Self::new(&step.cmd).args(step.args.iter().cloned());
        for (k, v) in &step.env {
            prefetcher = prefetcher.env(k, v);
        }
        prefetcher
    }
}

impl Prefetcher for CommandPrefetcher {
    /// The command line in shell form, variables first: `K=V program args`.
    fn key(&self) -> String {
        let mut env: Vec<_> = self.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        env.sort();
        env.into_iter()
            .chain(std::iter::once(self.program.clone()))
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn warm_up(&self, config: &HarnessConfig) -> std::result::Result<(), WarmUpFailure> {
        let program = find_executable(&self.program, config.toolchain_root.as_deref())
            .map_err(|e| WarmUpFailure::message(e.to_string()))?;
        debug!(program = %program.display(), args = ?self.args, "running warm-up");

        let output = Command::new(&program)
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .current_dir(&config.root_dir)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| WarmUpFailure::message(format!("failed to start: {e}")))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(WarmUpFailure {
                message: format!("exited with {}", output.status),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}
