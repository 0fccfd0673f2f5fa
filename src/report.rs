//! Result reporting for the table runner.

use crate::check::{Stream, dump_output};
use crate::table::TableResult;
use crate::testcase::TestResult;
use std::fmt::Write as _;
use std::io;
use std::time::Duration;

/// The outcome of one table file.
#[derive(Debug)]
pub struct FileResult {
    pub file: String,
    pub outcome: Result<TableResult, String>,
}

impl FileResult {
    fn tests(&self) -> &[TestResult] {
        match &self.outcome {
            Ok(result) => &result.tests,
            Err(_) => &[],
        }
    }

    fn total_time(&self) -> Duration {
        self.tests().iter().map(|t| t.duration).sum()
    }
}

/// Pass/fail totals. A file that failed to load counts as one failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
}

impl Summary {
    pub fn of(results: &[FileResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match &result.outcome {
                Err(_) => summary.failed += 1,
                Ok(table) => {
                    for test in &table.tests {
                        if test.passed {
                            summary.passed += 1;
                        } else {
                            summary.failed += 1;
                        }
                    }
                }
            }
        }
        summary
    }
}

/// Human-readable output with checkmarks. Load errors go to `err`.
pub fn write_human(
    out: &mut dyn io::Write,
    err: &mut dyn io::Write,
    results: &[FileResult],
    verbose: bool,
) -> io::Result<()> {
    for result in results {
        let table = match &result.outcome {
            Ok(table) => table,
            Err(e) => {
                writeln!(err, "✗ Failed to load {}: {e}", result.file)?;
                continue;
            }
        };

        writeln!(out, "\n{}", result.file)?;
        for test in &table.tests {
            if test.passed {
                writeln!(out, "  ✓ {} ({:.2?})", test.name, test.duration)?;
                continue;
            }
            writeln!(out, "  ✗ {} ({:.2?})", test.name, test.duration)?;
            for failure in &test.failures {
                for line in failure.lines() {
                    writeln!(out, "    {line}")?;
                }
            }
            if let Some(script) = &test.script {
                writeln!(out, "    script: {}", script.display())?;
            }
            if verbose {
                if let Some(stdout) = &test.stdout {
                    write!(out, "{}", indent(&dump_output(Stream::Stdout, stdout)))?;
                }
                if let Some(stderr) = &test.stderr {
                    write!(out, "{}", indent(&dump_output(Stream::Stderr, stderr)))?;
                }
            }
        }
    }

    let summary = Summary::of(results);
    writeln!(out, "\n{} passed, {} failed", summary.passed, summary.failed)
}

fn indent(text: &str) -> String {
    text.lines().fold(String::new(), |mut acc, line| {
        let _ = writeln!(acc, "    {line}");
        acc
    })
}

/// Machine-readable JSON output.
pub fn write_json(out: &mut dyn io::Write, results: &[FileResult]) -> io::Result<()> {
    let summary = Summary::of(results);
    let files: Vec<_> = results
        .iter()
        .map(|r| match &r.outcome {
            Ok(table) => serde_json::json!({
                "file": r.file,
                "tests": table.tests,
            }),
            Err(e) => serde_json::json!({
                "file": r.file,
                "error": e,
            }),
        })
        .collect();
    let output = serde_json::json!({
        "passed": summary.passed,
        "failed": summary.failed,
        "results": files,
    });
    serde_json::to_writer_pretty(&mut *out, &output)?;
    writeln!(out)
}

/// Format test results as JUnit XML.
pub fn format_junit_xml(results: &[FileResult], total_time: Duration) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");

    let summary = Summary::of(results);
    let _ = writeln!(
        xml,
        "<testsuites tests=\"{}\" failures=\"{}\" time=\"{:.3}\">",
        summary.passed + summary.failed,
        summary.failed,
        total_time.as_secs_f64()
    );

    for file_result in results {
        let load_failure;
        let tests = match &file_result.outcome {
            Ok(table) => table.tests.as_slice(),
            Err(e) => {
                load_failure = [TestResult::aborted(
                    "<load>",
                    Duration::ZERO,
                    format!("Failed to load table: {e}"),
                )];
                &load_failure[..]
            }
        };
        let failures = tests.iter().filter(|t| !t.passed).count();

        let _ = writeln!(
            xml,
            "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{failures}\" time=\"{:.3}\">",
            escape_xml(&file_result.file),
            tests.len(),
            file_result.total_time().as_secs_f64()
        );

        for test in tests {
            let _ = writeln!(
                xml,
                "    <testcase name=\"{}\" time=\"{:.3}\">",
                escape_xml(&test.name),
                test.duration.as_secs_f64()
            );

            if !test.passed {
                let message = test
                    .failures
                    .first()
                    .map(|s| s.as_str())
                    .unwrap_or("Test failed");
                let _ = writeln!(xml, "      <failure message=\"{}\">", escape_xml(message));
                for failure in &test.failures {
                    let _ = writeln!(xml, "{}", escape_xml(failure));
                }
                if let Some(script) = &test.script {
                    let _ = writeln!(xml, "script: {}", escape_xml(&script.display().to_string()));
                }
                xml.push_str("      </failure>\n");
            }

            if let Some(stdout) = &test.stdout {
                let _ = writeln!(xml, "      <system-out>{}</system-out>", escape_xml(stdout));
            }
            if let Some(stderr) = &test.stderr {
                let _ = writeln!(xml, "      <system-err>{}</system-err>", escape_xml(stderr));
            }

            xml.push_str("    </testcase>\n");
        }

        xml.push_str("  </testsuite>\n");
    }

    xml.push_str("</testsuites>\n");
    xml
}

/// Escape special XML characters.
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn passed(name: &str) -> TestResult {
        TestResult {
            name: name.to_string(),
            passed: true,
            duration: Duration::from_millis(5),
            failures: vec![],
            exit_code: Some(0),
            stdout: None,
            stderr: None,
            script: None,
        }
    }

    fn failed(name: &str) -> TestResult {
        TestResult {
            name: name.to_string(),
            passed: false,
            duration: Duration::from_millis(7),
            failures: vec!["Exit code: expected 0, got 1".to_string()],
            exit_code: Some(1),
            stdout: Some("<out>\n".to_string()),
            stderr: Some(String::new()),
            script: Some(PathBuf::from("/tmp/x/20180718-230000.bash")),
        }
    }

    fn results() -> Vec<FileResult> {
        vec![
            FileResult {
                file: "a.yaml".to_string(),
                outcome: Ok(TableResult {
                    tests: vec![passed("ok"), failed("bad & worse")],
                }),
            },
            FileResult {
                file: "b.yaml".to_string(),
                outcome: Err("invalid YAML".to_string()),
            },
        ]
    }

    #[test]
    fn summary_counts_load_errors() {
        assert_eq!(
            Summary::of(&results()),
            Summary {
                passed: 1,
                failed: 2
            }
        );
    }

    #[test]
    fn human_output() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        write_human(&mut out, &mut err, &results(), true).unwrap();
        let out = String::from_utf8(out).unwrap();
        let err = String::from_utf8(err).unwrap();
        assert!(out.contains("  ✓ ok ("));
        assert!(out.contains("  ✗ bad & worse ("));
        assert!(out.contains("    Exit code: expected 0, got 1\n"));
        assert!(out.contains("    script: /tmp/x/20180718-230000.bash\n"));
        assert!(out.contains("    ───── BEGIN STDOUT ─────\n    <out>\n"));
        assert!(out.ends_with("\n1 passed, 2 failed\n"));
        assert!(err.contains("✗ Failed to load b.yaml: invalid YAML"));
    }

    #[test]
    fn json_output() {
        let mut out = Vec::new();
        write_json(&mut out, &results()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["passed"], 1);
        assert_eq!(value["failed"], 2);
        assert_eq!(value["results"][0]["tests"][1]["exit_code"], 1);
        assert_eq!(value["results"][1]["error"], "invalid YAML");
    }

    #[test]
    fn junit_output() {
        let xml = format_junit_xml(&results(), Duration::from_millis(12));
        assert!(xml.contains("<testsuites tests=\"3\" failures=\"2\""));
        assert!(xml.contains("<testcase name=\"bad &amp; worse\""));
        assert!(xml.contains("<system-out>&lt;out&gt;\n</system-out>"));
        assert!(xml.contains("<testcase name=\"&lt;load&gt;\""));
        assert!(xml.contains("Failed to load table: invalid YAML"));
    }

    #[test]
    fn escape() {
        assert_eq!(escape_xml("<a href=\"x\">'&'</a>"), "&lt;a href=&quot;x&quot;&gt;&apos;&amp;&apos;&lt;/a&gt;");
    }
}
