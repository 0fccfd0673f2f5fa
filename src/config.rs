//! Harness configuration.
//!
//! A [`HarnessConfig`] is either built in code (the usual case inside a
//! `#[test]`) or loaded from `shellharness.yaml` in the test root by the
//! [`loader`](crate::loader).

use crate::env::interpolate_env_with;
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration shared by every test run through one [`Harness`](crate::Harness).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HarnessConfig {
    /// Schema version.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Shell used to execute assembled scripts.
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Emit `set -Eeuo pipefail` at the top of every assembled script.
    #[serde(default = "default_true")]
    pub strict: bool,

    /// Working directory of every script run (the repository root).
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Directory holding the library fragments that `load` reads.
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,

    /// Directory the generated `unittest-*.bash` files are written to.
    #[serde(default = "default_root_dir")]
    pub script_dir: PathBuf,

    /// Toolchain installation root. `<root>/bin` is searched before `PATH`
    /// when resolving delegated binaries, and is put on the script's `PATH`.
    #[serde(default)]
    pub toolchain_root: Option<PathBuf>,

    /// Where failing scripts are persisted (defaults to the system temp dir).
    #[serde(default)]
    pub debug_dir: Option<PathBuf>,

    /// Watchdog timeout in seconds for a single script run. `0` disables it.
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Additional `export K="V"` lines emitted after the bootstrap.
    #[serde(default)]
    pub env: IndexMap<String, String>,

    /// Variable set to `true` to switch off CI auto-verbosity in the library.
    #[serde(default = "default_manual_verbose_var")]
    pub manual_verbose_var: Option<String>,

    /// Variable pointing at the per-test artifacts directory.
    #[serde(default = "default_artifacts_var")]
    pub artifacts_var: Option<String>,

    /// Regexes whose matches are removed from stderr before it is checked.
    #[serde(default)]
    pub stderr_filters: Vec<String>,

    /// `go run` targets the `go` preset passes through to the real toolchain
    /// (and prefetches).
    #[serde(default)]
    pub go_tools: Vec<String>,

    /// Run table files serially instead of in parallel.
    #[serde(default)]
    pub serial: bool,

    /// Commands run once before any table, to warm shared caches.
    #[serde(default)]
    pub prefetch: Vec<PrefetchStep>,
}

/// A suite-level warm-up command.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PrefetchStep {
    /// The command/binary to execute.
    pub cmd: String,

    /// Command arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables for the command.
    #[serde(default)]
    pub env: IndexMap<String, String>,
}

fn default_version() -> u32 {
    1
}

fn default_shell() -> String {
    "bash".to_string()
}

fn default_true() -> bool {
    true
}

fn default_root_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("scripts")
}

fn default_manual_verbose_var() -> Option<String> {
    Some("HACK_SCRIPT_MANUAL_VERBOSE".to_string())
}

fn default_artifacts_var() -> Option<String> {
    Some("ARTIFACTS".to_string())
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            shell: default_shell(),
            strict: true,
            root_dir: default_root_dir(),
            scripts_dir: default_scripts_dir(),
            script_dir: default_root_dir(),
            toolchain_root: None,
            debug_dir: None,
            timeout: None,
            env: IndexMap::new(),
            manual_verbose_var: default_manual_verbose_var(),
            artifacts_var: default_artifacts_var(),
            stderr_filters: Vec::new(),
            go_tools: Vec::new(),
            serial: false,
            prefetch: Vec::new(),
        }
    }
}

impl HarnessConfig {
    /// Creates a config rooted at `root`, with fragments in `<root>/scripts`
    /// and generated scripts written directly into `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            scripts_dir: root.join(default_scripts_dir()),
            script_dir: root.clone(),
            root_dir: root,
            ..Self::default()
        }
    }

    /// Sets the fragment directory (relative paths resolve against the root).
    #[must_use]
    pub fn with_scripts_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.scripts_dir = self.root_dir.join(dir);
        self
    }

    /// Sets the directory generated scripts are written to (relative paths
    /// resolve against the root).
    #[must_use]
    pub fn with_script_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.script_dir = self.root_dir.join(dir);
        self
    }

    #[must_use]
    pub fn with_toolchain_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.toolchain_root = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_debug_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_dir = Some(dir.into());
        self
    }

    /// Sets the watchdog timeout (rounded up to whole seconds).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        self.timeout = Some(secs.max(1));
        self
    }

    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_stderr_filter(mut self, pattern: impl Into<String>) -> Self {
        self.stderr_filters.push(pattern.into());
        self
    }

    #[must_use]
    pub fn with_go_tool(mut self, tool: impl Into<String>) -> Self {
        self.go_tools.push(tool.into());
        self
    }

    /// The watchdog timeout, if any. Zero seconds means no watchdog.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.filter(|&secs| secs > 0).map(Duration::from_secs)
    }

    /// The directory failing scripts are persisted under.
    pub fn debug_dir(&self) -> PathBuf {
        self.debug_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Interpolates `${VAR}` references in path fields and resolves relative
    /// paths against `base` (the directory holding the config file).
    ///
    /// `${CONFIG_DIR}` expands to `base`. A toolchain root that interpolates
    /// to an empty string is treated as unset.
    pub fn resolve(mut self, base: &Path) -> Result<Self, String> {
        let vars = HashMap::from([("CONFIG_DIR".to_string(), base.display().to_string())]);
        let resolve = |p: &Path| -> Result<PathBuf, String> {
            let expanded = PathBuf::from(interpolate_env_with(&p.to_string_lossy(), &vars)?);
            Ok(if expanded.is_absolute() {
                expanded
            } else {
                base.join(expanded)
            })
        };

        self.root_dir = resolve(&self.root_dir)?;
        self.scripts_dir = resolve(&self.scripts_dir)?;
        self.script_dir = resolve(&self.script_dir)?;
        self.debug_dir = self.debug_dir.as_deref().map(resolve).transpose()?;
        self.toolchain_root = match self.toolchain_root.take() {
            Some(p) => {
                let expanded = interpolate_env_with(&p.to_string_lossy(), &vars)?;
                if expanded.is_empty() {
                    None
                } else {
                    Some(resolve(Path::new(&expanded))?)
                }
            }
            None => None,
        };
        Ok(self)
    }
}
