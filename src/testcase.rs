//! Test cases and their outcomes.

use crate::assembler::ShellScript;
use crate::check::{Check, ExpectedExit, Stream, check_stream, dump_output};
use crate::error::Result;
use crate::runner::Harness;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// One scenario: commands to append to the script and what they must produce.
///
/// A case with no stdout (or stderr) checks expects that stream to be empty.
/// Without an explicit exit code, a case with stderr checks expects a
/// non-zero exit and every other case expects zero.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    pub name: String,
    pub commands: Vec<String>,
    pub retcode: Option<i32>,
    pub stdout: Vec<Check>,
    pub stderr: Vec<Check>,
}

impl TestCase {
    /// A case whose name doubles as its command.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commands: Vec::new(),
            retcode: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    #[must_use]
    pub fn commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands = commands.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn retcode(mut self, code: i32) -> Self {
        self.retcode = Some(code);
        self
    }

    #[must_use]
    pub fn stdout(mut self, checks: impl IntoIterator<Item = Check>) -> Self {
        self.stdout = checks.into_iter().collect();
        self
    }

    #[must_use]
    pub fn stderr(mut self, checks: impl IntoIterator<Item = Check>) -> Self {
        self.stderr = checks.into_iter().collect();
        self
    }

    /// The commands to run: the explicit list, or the name itself.
    pub fn test_commands(&self) -> Vec<String> {
        if self.commands.is_empty() {
            vec![self.name.clone()]
        } else {
            self.commands.clone()
        }
    }

    pub fn expected_exit(&self) -> ExpectedExit {
        ExpectedExit::derive(self.retcode, !self.stderr.is_empty())
    }
}

/// Result of running a single test.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    #[serde(serialize_with = "serialize_duration")]
    pub duration: Duration,
    pub failures: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Where the failing script was saved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<PathBuf>,
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

impl TestResult {
    /// A failed result for a case that never got to its assertions.
    pub fn aborted(name: impl Into<String>, duration: Duration, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            duration,
            failures: vec![reason.into()],
            exit_code: None,
            stdout: None,
            stderr: None,
            script: None,
        }
    }

    /// The failures, stream dumps and saved script path as one message.
    pub fn report(&self) -> String {
        let mut out = format!("{}:\n", self.name);
        for failure in &self.failures {
            let _ = writeln!(out, "  {failure}");
        }
        if let Some(stdout) = &self.stdout {
            out.push_str(&dump_output(Stream::Stdout, stdout));
        }
        if let Some(stderr) = &self.stderr {
            out.push_str(&dump_output(Stream::Stderr, stderr));
        }
        if let Some(script) = &self.script {
            let _ = writeln!(out, "script: {}", script.display());
        }
        out
    }
}

impl Harness {
    /// Runs one case and evaluates its checks.
    ///
    /// `Err` means the environment is broken; a failed assertion is an
    /// `Ok` result with `passed == false`. The source of a failing script is
    /// persisted under the debug directory.
    pub fn run_case(&self, script: &ShellScript, case: &TestCase) -> Result<TestResult> {
        let start = Instant::now();
        let ctx = self.context(&case.name)?;
        let result = self.execute(script, &ctx, &case.test_commands())?;
        let stderr = self.filter_stderr(&result.stderr);

        let mut failures = Vec::new();
        if let Err(e) = case.expected_exit().verify(result.exit_code) {
            failures.push(e);
        }
        failures.extend(check_stream(Stream::Stdout, &result.stdout, &case.stdout));
        failures.extend(check_stream(Stream::Stderr, &stderr, &case.stderr));

        if failures.is_empty() {
            return Ok(TestResult {
                name: case.name.clone(),
                passed: true,
                duration: start.elapsed(),
                failures,
                exit_code: Some(result.exit_code),
                stdout: None,
                stderr: None,
                script: None,
            });
        }

        let script_path = self.persist_failed_script(&case.name, &result.source)?;
        warn!(
            test = %case.name,
            script = %script_path.display(),
            "{}{}",
            dump_output(Stream::Stdout, &result.stdout),
            dump_output(Stream::Stderr, &stderr),
        );
        Ok(TestResult {
            name: case.name.clone(),
            passed: false,
            duration: start.elapsed(),
            failures,
            exit_code: Some(result.exit_code),
            stdout: Some(result.stdout),
            stderr: Some(stderr),
            script: Some(script_path),
        })
    }

    /// Runs cases concurrently, returning outcomes in declaration order.
    ///
    /// Harness errors are folded into failed results.
    pub fn run_cases(&self, script: &ShellScript, cases: &[TestCase]) -> Vec<TestResult> {
        thread::scope(|s| {
            let handles: Vec<_> = cases
                .iter()
                .map(|case| s.spawn(move || (case, self.run_case(script, case))))
                .collect();

            handles
                .into_iter()
                .zip(cases)
                .map(|(handle, case)| match handle.join() {
                    Ok((_, Ok(result))) => result,
                    Ok((case, Err(e))) => {
                        error!(test = %case.name, error = %e, "harness failure");
                        TestResult::aborted(&case.name, Duration::ZERO, format!("Harness error: {e}"))
                    }
                    Err(_) => TestResult::aborted(&case.name, Duration::ZERO, "Test thread panicked"),
                })
                .collect()
        })
    }

    /// Runs one case and panics with a full report if it fails.
    #[track_caller]
    pub fn assert_case(&self, script: &ShellScript, case: &TestCase) {
        match self.run_case(script, case) {
            Ok(result) if result.passed => {}
            Ok(result) => panic!("{}", result.report()),
            Err(e) => panic!("{}: harness error: {e}", case.name),
        }
    }

    /// Runs cases concurrently and panics listing every failure.
    #[track_caller]
    pub fn assert_cases(&self, script: &ShellScript, cases: &[TestCase]) {
        let failed: Vec<String> = self
            .run_cases(script, cases)
            .into_iter()
            .filter(|r| !r.passed)
            .map(|r| r.report())
            .collect();
        if !failed.is_empty() {
            panic!(
                "{} of {} cases failed\n\n{}",
                failed.len(),
                cases.len(),
                failed.join("\n")
            );
        }
    }
}
