//! Table execution.
//!
//! Builds the program and cases a [`TableSpec`] describes and runs them
//! through a [`Harness`].

use crate::assembler::ShellScript;
use crate::check::{self, Check};
use crate::error::{HarnessError, Result};
use crate::mock::{ArgPattern, Invocation, MockBinary, Response};
use crate::presets::{PresetArgs, Registry};
use crate::runner::Harness;
use crate::schema::{
    OutputMatch, ResponseSpec, ScriptletSpec, StreamExpect, TABLE_VERSION, TableSpec, TestEntry,
};
use crate::scriptlet::{Scriptlet, envs, instructions, load};
use crate::testcase::{TestCase, TestResult};
use std::time::{Duration, Instant};
use tracing::debug;

/// Result of running a table file.
#[derive(Debug, serde::Serialize)]
pub struct TableResult {
    pub tests: Vec<TestResult>,
}

/// Checks a table without running it: a supported version, one kind per
/// scriptlet entry, unambiguous mock responses, known preset names and valid
/// regexes.
pub fn validate(spec: &TableSpec, registry: &Registry) -> std::result::Result<(), Vec<String>> {
    let mut problems = Vec::new();
    if let Err(e) = check_version(spec) {
        problems.push(e);
    }
    for (i, entry) in spec.scripts.iter().enumerate() {
        if let Err(e) = entry_kind(entry) {
            problems.push(format!("scripts[{i}]: {e}"));
        }
        for (j, response) in entry_responses(entry).iter().enumerate() {
            for e in response_problems(response) {
                problems.push(format!("scripts[{i}]: responses[{j}]: {e}"));
            }
        }
        if let Some(preset) = &entry.preset
            && !registry.contains(preset.name())
        {
            problems.push(format!("scripts[{i}]: unknown preset {:?}", preset.name()));
        }
    }
    for entry in &spec.tests {
        if let Err(e) = build_case(entry) {
            problems.push(format!("{}: {e}", entry.name));
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems)
    }
}

/// Assembles the scriptlets of a table, in order.
pub fn build_script(spec: &TableSpec, registry: &Registry, go_tools: &[String]) -> Result<ShellScript> {
    check_version(spec).map_err(HarnessError::InvalidTable)?;
    let mut script = ShellScript::new();
    for entry in &spec.scripts {
        script.push(build_scriptlet(entry, registry, go_tools)?);
    }
    Ok(script)
}

fn check_version(spec: &TableSpec) -> std::result::Result<(), String> {
    if spec.version == TABLE_VERSION {
        Ok(())
    } else {
        Err(format!(
            "unsupported version {} (expected {TABLE_VERSION})",
            spec.version
        ))
    }
}

fn entry_kind(entry: &ScriptletSpec) -> std::result::Result<&'static str, String> {
    match entry.kinds().as_slice() {
        [kind] => Ok(*kind),
        [] => Err("empty scriptlet entry".to_string()),
        many => Err(format!("expected one scriptlet kind, got {}", many.join(", "))),
    }
}

fn build_scriptlet(
    entry: &ScriptletSpec,
    registry: &Registry,
    go_tools: &[String],
) -> Result<Box<dyn Scriptlet>> {
    entry_kind(entry).map_err(HarnessError::InvalidTable)?;
    if let Some(names) = &entry.load {
        return Ok(load(names.iter().cloned()).boxed());
    }
    if let Some(lines) = &entry.instructions {
        return Ok(instructions(lines.iter().cloned()).boxed());
    }
    if let Some(vars) = &entry.envs {
        return Ok(envs(vars.iter()).boxed());
    }
    if let Some(mock) = &entry.mock {
        let responses = mock
            .responses
            .iter()
            .map(build_response)
            .collect::<Result<Vec<_>>>()?;
        return Ok(MockBinary::new(&mock.name).responses(responses).boxed());
    }
    if let Some(preset) = &entry.preset {
        let args = PresetArgs {
            responses: preset
                .responses()
                .iter()
                .map(build_response)
                .collect::<Result<_>>()?,
            go_tools: go_tools.to_vec(),
        };
        return registry.build(preset.name(), &args);
    }
    Err(HarnessError::InvalidTable("empty scriptlet entry".to_string()))
}

fn entry_responses(entry: &ScriptletSpec) -> &[ResponseSpec] {
    if let Some(mock) = &entry.mock {
        &mock.responses
    } else if let Some(preset) = &entry.preset {
        preset.responses()
    } else {
        &[]
    }
}

/// A response names at most one argument pattern, and a delegating response
/// carries no canned output or status.
fn response_problems(spec: &ResponseSpec) -> Vec<&'static str> {
    let mut problems = Vec::new();
    if spec.exact.is_some() && spec.prefix.is_some() {
        problems.push("expected one argument pattern, got exact, prefix");
    }
    if spec.call_original && (spec.output.is_some() || spec.exit.is_some()) {
        problems.push("call_original cannot be combined with output or exit");
    }
    problems
}

fn build_response(spec: &ResponseSpec) -> Result<Response> {
    let problems = response_problems(spec);
    if !problems.is_empty() {
        return Err(HarnessError::InvalidTable(problems.join("; ")));
    }
    let args = match (&spec.exact, &spec.prefix) {
        (Some(exact), _) => ArgPattern::Exact(exact.clone()),
        (None, Some(prefix)) => ArgPattern::Prefix(prefix.clone()),
        (None, None) => ArgPattern::Any,
    };
    let invocation = if spec.call_original {
        Invocation::CallOriginal
    } else {
        let output = Invocation::output(spec.output.as_deref().unwrap_or(""));
        match spec.exit {
            Some(code) => output.exit(code),
            None => output,
        }
    };
    Ok(Response { args, invocation })
}

/// Converts a table entry into a [`TestCase`].
pub fn build_case(entry: &TestEntry) -> Result<TestCase> {
    let mut case = TestCase::new(&entry.name)
        .commands(entry.commands.iter().cloned())
        .stdout(build_checks(entry.stdout.as_ref())?)
        .stderr(build_checks(entry.stderr.as_ref())?);
    case.retcode = entry.retcode;
    Ok(case)
}

fn build_checks(expect: Option<&StreamExpect>) -> Result<Vec<Check>> {
    let mut checks = Vec::new();
    let Some(expect) = expect else {
        return Ok(checks);
    };
    for matcher in expect.matchers() {
        match matcher {
            OutputMatch::Exact(expected) => checks.extend(check::equal(expected.as_str())),
            OutputMatch::Structured(s) => {
                if let Some(expected) = &s.equals {
                    checks.extend(check::equal(expected.as_str()));
                }
                if let Some(lines) = &s.lines {
                    checks.extend(check::lines(lines));
                }
                if let Some(substring) = &s.contains {
                    checks.push(check::contains(substring.as_str()));
                }
                if let Some(pattern) = &s.regex {
                    checks.push(check::matches(pattern)?);
                }
            }
        }
    }
    Ok(checks)
}

/// Run a table, keeping only tests whose name contains `filter`.
pub fn run_table_filtered(
    spec: &TableSpec,
    harness: &Harness,
    registry: &Registry,
    filter: Option<&str>,
) -> TableResult {
    let start = Instant::now();
    let script = match build_script(spec, registry, &harness.config().go_tools) {
        Ok(script) => script,
        Err(e) => {
            return TableResult {
                tests: vec![TestResult::aborted(
                    "<setup>",
                    start.elapsed(),
                    format!("Failed to assemble scripts: {e}"),
                )],
            };
        }
    };

    // Invalid entries keep their slot so results follow declaration order
    let mut slots = Vec::new();
    let mut cases = Vec::new();
    for entry in spec
        .tests
        .iter()
        .filter(|t| filter.map(|f| t.name.contains(f)).unwrap_or(true))
    {
        match build_case(entry) {
            Ok(case) => {
                cases.push(case);
                slots.push(None);
            }
            Err(e) => slots.push(Some(TestResult::aborted(
                &entry.name,
                Duration::ZERO,
                format!("Invalid test: {e}"),
            ))),
        }
    }
    debug!(cases = cases.len(), "running table");

    let mut ran = harness.run_cases(&script, &cases).into_iter();
    let tests = slots
        .into_iter()
        .filter_map(|slot| slot.or_else(|| ran.next()))
        .collect();
    TableResult { tests }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;

    fn table(yaml: &str) -> TableSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn build_case_from_entry() {
        let spec = table(
            r#"
version: 1
tests:
  - name: abort boom
    stderr:
      - contains: boom
      - regex: "^ERROR"
  - name: listing
    commands: [ls, "echo done"]
    retcode: 0
    stdout:
      lines: [a, b]
"#,
        );
        let abort = build_case(&spec.tests[0]).unwrap();
        assert_eq!(abort.stderr.len(), 2);
        assert!(abort.stdout.is_empty());
        assert_eq!(abort.test_commands(), vec!["abort boom"]);

        let listing = build_case(&spec.tests[1]).unwrap();
        assert_eq!(listing.test_commands(), vec!["ls", "echo done"]);
        assert_eq!(listing.retcode, Some(0));
        assert_eq!(listing.stdout, check::lines(["a", "b"]));
    }

    #[test]
    fn build_response_patterns() {
        let r = build_response(&ResponseSpec {
            prefix: Some("get".into()),
            output: Some("x\ny\n".into()),
            exit: Some(2),
            ..ResponseSpec::default()
        })
        .unwrap();
        assert_eq!(r.args, ArgPattern::Prefix("get".into()));
        assert_eq!(
            r.invocation,
            Invocation::Simply {
                lines: vec!["x".into(), "y".into()],
                exit_code: Some(2)
            }
        );
        let any = build_response(&ResponseSpec::default()).unwrap();
        assert_eq!(any.args, ArgPattern::Any);
    }

    #[test]
    fn ambiguous_responses_are_rejected() {
        let both_patterns = ResponseSpec {
            exact: Some("status".into()),
            prefix: Some("push".into()),
            ..ResponseSpec::default()
        };
        let delegate_with_output = ResponseSpec {
            call_original: true,
            output: Some("hit".into()),
            ..ResponseSpec::default()
        };
        let delegate_with_exit = ResponseSpec {
            call_original: true,
            exit: Some(1),
            ..ResponseSpec::default()
        };
        for spec in [both_patterns, delegate_with_output, delegate_with_exit] {
            assert!(
                matches!(build_response(&spec), Err(HarnessError::InvalidTable(_))),
                "{spec:?}"
            );
        }

        let spec = table(
            r#"
version: 1
scripts:
  - mock:
      name: git
      responses:
        - exact: status
          prefix: push
          output: hit
          call_original: true
tests:
  - name: git status
"#,
        );
        let err = build_script(&spec, &Registry::builtin(), &[]).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidTable(_)), "{err}");
    }

    #[test]
    fn validate_reports_problems() {
        let spec = table(
            r#"
version: 1
scripts:
  - preset: helm
  - {}
  - load: [a.bash]
    instructions: [x]
  - mock:
      name: git
      responses:
        - prefix: status
        - exact: status
          prefix: push
          output: hit
          call_original: true
  - preset:
      name: kubectl
      responses:
        - call_original: true
          exit: 1
tests:
  - name: bad regex
    stdout:
      regex: "("
"#,
        );
        let problems = validate(&spec, &Registry::builtin()).unwrap_err();
        assert_eq!(problems.len(), 7, "{problems:?}");
        assert!(problems[0].contains("unknown preset \"helm\""));
        assert!(problems[1].contains("empty scriptlet entry"));
        assert!(problems[2].contains("load, instructions"));
        assert_eq!(
            problems[3],
            "scripts[3]: responses[1]: expected one argument pattern, got exact, prefix"
        );
        assert_eq!(
            problems[4],
            "scripts[3]: responses[1]: call_original cannot be combined with output or exit"
        );
        assert_eq!(
            problems[5],
            "scripts[4]: responses[0]: call_original cannot be combined with output or exit"
        );
        assert!(problems[6].starts_with("bad regex:"));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let spec = table("version: 2\ntests:\n  - name: \"true\"\n");
        let problems = validate(&spec, &Registry::builtin()).unwrap_err();
        assert_eq!(problems, vec!["unsupported version 2 (expected 1)"]);
        assert!(matches!(
            build_script(&spec, &Registry::builtin(), &[]),
            Err(HarnessError::InvalidTable(_))
        ));
    }

    #[test]
    fn run_table_with_mock() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::new(
            HarnessConfig::new(dir.path()).with_debug_dir(dir.path().join("debug")),
        )
        .unwrap();
        let spec = table(
            r#"
version: 1
scripts:
  - envs:
      GREETING: hello
  - mock:
      name: git
      responses:
        - exact: rev-parse --abbrev-ref HEAD
          output: main
tests:
  - name: mock answers
    commands: [git rev-parse --abbrev-ref HEAD]
    stdout: "main\n"
  - name: mock falls back
    commands: [git push origin main]
    stdout:
      contains: "👻 git push origin main"
  - name: mock env
    commands: ['echo "$GREETING"']
    stdout:
      lines: [hello]
  - name: filtered out
"#,
        );
        let result = run_table_filtered(&spec, &harness, &Registry::builtin(), Some("mock"));
        assert_eq!(result.tests.len(), 3);
        assert!(result.tests.iter().all(|t| t.passed), "{result:?}");
    }

    #[test]
    fn invalid_entries_keep_declaration_order() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::new(HarnessConfig::new(dir.path())).unwrap();
        let spec = table(
            r#"
version: 1
tests:
  - name: echo first
    stdout:
      lines: [first]
  - name: broken
    stdout:
      regex: "("
  - name: echo last
    stdout:
      lines: [last]
"#,
        );
        let result = run_table_filtered(&spec, &harness, &Registry::builtin(), None);
        let names: Vec<_> = result.tests.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["echo first", "broken", "echo last"]);
        assert!(result.tests[0].passed);
        assert!(result.tests[1].failures[0].starts_with("Invalid test:"));
        assert!(result.tests[2].passed);
    }

    #[test]
    fn unknown_preset_fails_setup() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::new(HarnessConfig::new(dir.path())).unwrap();
        let spec = table(
            r#"
version: 1
scripts:
  - preset: helm
tests:
  - name: "true"
"#,
        );
        let result = run_table_filtered(&spec, &harness, &Registry::builtin(), None);
        assert_eq!(result.tests.len(), 1);
        assert_eq!(result.tests[0].name, "<setup>");
        assert!(result.tests[0].failures[0].contains("unknown preset: helm"));
    }
}
