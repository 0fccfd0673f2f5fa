//! Check engine.
//!
//! Declarative assertions over the captured streams and the exit code.

use crate::error::{HarnessError, Result};
use regex::Regex;
use std::fmt;
use std::fmt::Write as _;

/// A captured output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Stdout => f.write_str("stdout"),
            Stream::Stderr => f.write_str("stderr"),
        }
    }
}

impl Stream {
    fn marker(self) -> &'static str {
        match self {
            Stream::Stdout => "STDOUT",
            Stream::Stderr => "STDERR",
        }
    }
}

/// An assertion over one stream.
#[derive(Debug, Clone)]
pub enum Check {
    /// The stream contains the substring.
    Contains(String),
    /// The stream equals the literal exactly.
    Equals(String),
    /// The stream matches the regular expression somewhere.
    Matches(Regex),
}

impl PartialEq for Check {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Check::Contains(a), Check::Contains(b)) | (Check::Equals(a), Check::Equals(b)) => {
                a == b
            }
            (Check::Matches(a), Check::Matches(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl Check {
    /// Evaluates the check, describing the mismatch on failure.
    pub fn verify(&self, stream: Stream, actual: &str) -> std::result::Result<(), String> {
        match self {
            Check::Contains(substring) => {
                if actual.contains(substring.as_str()) {
                    Ok(())
                } else {
                    Err(format!("{stream}: expected to contain {substring:?}"))
                }
            }
            Check::Equals(expected) => {
                if actual == expected {
                    Ok(())
                } else {
                    Err(format!(
                        "{stream}: expected exact match\n  expected: {expected:?}\n  got: {actual:?}\n{}",
                        line_diff(expected, actual)
                    ))
                }
            }
            Check::Matches(re) => {
                if re.is_match(actual) {
                    Ok(())
                } else {
                    Err(format!(
                        "{stream}: expected to match regex {:?}",
                        re.as_str()
                    ))
                }
            }
        }
    }
}

/// The stream contains `substring`.
pub fn contains(substring: impl Into<String>) -> Check {
    Check::Contains(substring.into())
}

/// The stream is exactly `expected`.
pub fn equal(expected: impl Into<String>) -> Vec<Check> {
    vec![Check::Equals(expected.into())]
}

/// The stream is empty.
pub fn empty() -> Vec<Check> {
    equal("")
}

/// The stream is exactly these lines, each terminated by a newline.
pub fn lines<I, S>(lines: I) -> Vec<Check>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut expected = String::new();
    for line in lines {
        expected.push_str(line.as_ref());
        expected.push('\n');
    }
    equal(expected)
}

/// The stream matches `pattern`.
pub fn matches(pattern: &str) -> Result<Check> {
    Regex::new(pattern)
        .map(Check::Matches)
        .map_err(|source| HarnessError::Regex {
            pattern: pattern.to_string(),
            source,
        })
}

/// The exit status a case expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedExit {
    Exactly(i32),
    NonZero,
}

impl ExpectedExit {
    /// Derives the expectation: an explicit code wins, otherwise any stderr
    /// check means the script is expected to fail.
    pub fn derive(explicit: Option<i32>, has_stderr_checks: bool) -> Self {
        match explicit {
            Some(code) => ExpectedExit::Exactly(code),
            None if has_stderr_checks => ExpectedExit::NonZero,
            None => ExpectedExit::Exactly(0),
        }
    }

    pub fn verify(self, actual: i32) -> std::result::Result<(), String> {
        match self {
            ExpectedExit::Exactly(expected) if expected != actual => {
                Err(format!("Exit code: expected {expected}, got {actual}"))
            }
            ExpectedExit::NonZero if actual == 0 => {
                Err("Exit code: expected non-zero, got 0".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Runs every check against `actual`; no checks means the stream must be empty.
pub fn check_stream(stream: Stream, actual: &str, checks: &[Check]) -> Vec<String> {
    let implicit = empty();
    let checks = if checks.is_empty() {
        implicit.as_slice()
    } else {
        checks
    };
    checks
        .iter()
        .filter_map(|c| c.verify(stream, actual).err())
        .collect()
}

/// Wraps `output` in begin/end markers for failure reports.
pub fn dump_output(stream: Stream, output: &str) -> String {
    let name = stream.marker();
    format!("\n───── BEGIN {name} ─────\n{output}────── END {name} ──────\n")
}

fn line_diff(expected: &str, actual: &str) -> String {
    let mut out = String::from("  diff (- expected, + actual):\n");
    for d in diff::lines(expected, actual) {
        let _ = match d {
            diff::Result::Left(l) => writeln!(out, "  - {l}"),
            diff::Result::Both(l, _) => writeln!(out, "    {l}"),
            diff::Result::Right(r) => writeln!(out, "  + {r}"),
        };
    }
    out
}
