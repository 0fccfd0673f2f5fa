//! Process runner.
//!
//! Writes an assembled script next to the code under test, runs it with the
//! configured shell and captures what it did.

use crate::assembler::ShellScript;
use crate::config::HarnessConfig;
use crate::context::TestContext;
use crate::error::{HarnessError, Result};
use crate::mock::write_executable;
use crate::prefetch::{CommandPrefetcher, prefetch};
use regex::Regex;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Interval between exit polls while a watchdog is armed.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// What a script run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Exit status; `128 + signal` when the shell was killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// The exact program that ran.
    pub source: String,
}

/// Runs scripts against one configuration.
#[derive(Debug, Clone)]
pub struct Harness {
    config: Arc<HarnessConfig>,
    stderr_filters: Vec<Regex>,
}

impl Harness {
    /// Creates a harness, compiling the configured stderr filters.
    pub fn new(config: HarnessConfig) -> Result<Self> {
        let stderr_filters = config
            .stderr_filters
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| HarnessError::Regex {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            config: Arc::new(config),
            stderr_filters,
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// A fresh context for one test.
    pub fn context(&self, name: &str) -> Result<TestContext> {
        TestContext::new(name, Arc::clone(&self.config))
    }

    /// Runs the suite-level warm-up commands.
    pub fn prefetch_suite(&self) -> Result<()> {
        for step in &self.config.prefetch {
            prefetch(&CommandPrefetcher::from(step), &self.config)?;
        }
        Ok(())
    }

    /// Removes every configured stderr filter match from `stderr`.
    pub fn filter_stderr(&self, stderr: &str) -> String {
        self.stderr_filters
            .iter()
            .fold(stderr.to_string(), |acc, re| re.replace_all(&acc, "").into_owned())
    }

    /// Prefetches, assembles and runs `script` followed by `commands`.
    ///
    /// A non-zero exit is a normal result. The generated file is removed
    /// whatever happens.
    pub fn execute(
        &self,
        script: &ShellScript,
        ctx: &TestContext,
        commands: &[String],
    ) -> Result<ExecutionResult> {
        script.prefetch(&self.config)?;
        let source = script.source(ctx, commands)?;

        let file = self.write_script(&source)?;
        let outcome = self.run_file(file.path());
        if let Err(e) = file.close() {
            warn!(error = %e, "failed to remove generated script");
        }
        let (exit_code, stdout, stderr) = outcome?;

        Ok(ExecutionResult {
            exit_code,
            stdout,
            stderr,
            source,
        })
    }

    /// Saves `source` as `<debug_dir>/<test name>/<YYYYmmdd-HHMMSS>.bash`.
    pub fn persist_failed_script(&self, test_name: &str, source: &str) -> Result<PathBuf> {
        let dir = self.config.debug_dir().join(sanitize_name(test_name));
        std::fs::create_dir_all(&dir).map_err(|source| HarnessError::Write {
            path: dir.clone(),
            source,
        })?;
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let path = dir.join(format!("{stamp}.bash"));
        write_executable(&path, source)?;
        Ok(path)
    }

    fn write_script(&self, source: &str) -> Result<tempfile::NamedTempFile> {
        let dir = &self.config.script_dir;
        let write_err = |source| HarnessError::Write {
            path: dir.clone(),
            source,
        };
        let mut file = tempfile::Builder::new()
            .prefix("unittest-")
            .suffix(".bash")
            .rand_bytes(12)
            .tempfile_in(dir)
            .map_err(write_err)?;
        file.write_all(source.as_bytes()).map_err(write_err)?;
        file.flush().map_err(write_err)?;
        Ok(file)
    }

    fn run_file(&self, path: &Path) -> Result<(i32, String, String)> {
        let root = &self.config.root_dir;
        let script_arg = match path.strip_prefix(root) {
            Ok(relative) => Path::new(".").join(relative),
            Err(_) => path.to_path_buf(),
        };
        let shell = &self.config.shell;
        debug!(shell = %shell, script = %script_arg.display(), cwd = %root.display(), "running script");

        let mut cmd = Command::new(shell);
        cmd.arg(&script_arg)
            .current_dir(root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let timeout = self.config.timeout();
        #[cfg(unix)]
        if timeout.is_some() {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|source| HarnessError::Spawn {
            shell: shell.clone(),
            source,
        })?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let wait_err = |source| HarnessError::Wait {
            shell: shell.clone(),
            source,
        };
        let status = match timeout {
            None => child.wait().map_err(wait_err)?,
            Some(limit) => match wait_with_timeout(&mut child, limit).map_err(wait_err)? {
                Some(status) => status,
                None => {
                    warn!(script = %script_arg.display(), ?limit, "script timed out, killing process group");
                    kill_process_group(&mut child);
                    let _ = child.wait();
                    let _ = stdout.join();
                    let _ = stderr.join();
                    return Err(HarnessError::Timeout(limit));
                }
            },
        };

        let stdout = collect(stdout).map_err(wait_err)?;
        let stderr = collect(stderr).map_err(wait_err)?;
        Ok((exit_code(status), stdout, stderr))
    }
}

type Drain = thread::JoinHandle<std::io::Result<Vec<u8>>>;

fn drain<R: Read + Send + 'static>(stream: Option<R>) -> Drain {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut stream) = stream {
            stream.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn collect(handle: Drain) -> std::io::Result<String> {
    let bytes = handle
        .join()
        .map_err(|_| std::io::Error::other("output reader panicked"))??;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn wait_with_timeout(child: &mut Child, limit: Duration) -> std::io::Result<Option<ExitStatus>> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() > limit {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let killed = i32::try_from(child.id())
        .ok()
        .map(|pid| killpg(Pid::from_raw(pid), Signal::SIGKILL).is_ok())
        .unwrap_or(false);
    if !killed {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Makes a test name usable as a directory name.
fn sanitize_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match sanitized.trim_matches('.') {
        "" => "unnamed".to_string(),
        s => s.to_string(),
    }
}
