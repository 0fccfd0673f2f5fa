//! Drives the `shellharness` binary end to end.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use std::time::Instant;
use tempfile::TempDir;

fn shellharness_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_shellharness"))
}

fn suite(extra_config: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    let config = format!(
        "version: 1\nscripts_dir: \"{}/tests/scripts\"\n{extra_config}",
        env!("CARGO_MANIFEST_DIR")
    );
    fs::write(dir.path().join("shellharness.yaml"), config).unwrap();
    dir
}

fn run(path: &Path, args: &[&str]) -> Output {
    shellharness_cmd().arg("run").arg(path).args(args).output().unwrap()
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

const PASSING_TABLE: &str = r#"version: 1
scripts:
  - load: [library.bash]
  - preset: kubectl
  - mock:
      name: ko
      responses:
        - prefix: apply
          output: "configured"
tests:
  - name: is_protected_gcr "gcr.io/knative-releases"
  - name: is_protected_gcr "gcr.io/knative-foobar"
    retcode: 1
  - name: current_context
    stdout:
      lines: [gke_deadbeef_1.24]
  - name: current_time
    stdout: "2018-07-18 23:00:00\n"
  - name: deploy
    stdout:
      contains: configured
  - name: abort boom
    stderr:
      - contains: boom
      - regex: "^ERROR"
"#;

const FAILING_TABLE: &str = r#"version: 1
scripts:
  - load: [library.bash]
tests:
  - name: capitalize foo
    stdout:
      lines: [foo]
"#;

/// A table with one test that sleeps for `secs`.
fn sleep_table(name: &str, secs: f64) -> String {
    format!(
        r#"version: 1
tests:
  - name: {name}
    commands: ["sleep {secs}"]
"#
    )
}

#[test]
fn passing_table_exits_zero() {
    let dir = suite("");
    fs::write(dir.path().join("library.yaml"), PASSING_TABLE).unwrap();

    let output = run(dir.path(), &[]);
    let stdout = text(&output.stdout);
    assert!(output.status.success(), "stdout: {stdout}\nstderr: {}", text(&output.stderr));
    assert!(stdout.contains("✓ current_context"));
    assert!(stdout.ends_with("6 passed, 0 failed\n"));
}

#[test]
fn failing_table_exits_one_and_saves_script() {
    let dir = suite("");
    let debug = TempDir::new().unwrap();
    fs::write(dir.path().join("failing.yaml"), FAILING_TABLE).unwrap();

    let output = run(
        dir.path(),
        &["--debug-dir", debug.path().to_str().unwrap()],
    );
    let stdout = text(&output.stdout);
    assert_eq!(output.status.code(), Some(1), "{stdout}");
    assert!(stdout.contains("✗ capitalize foo"));
    assert!(stdout.contains("  + Foo"));
    assert!(stdout.contains(&format!("script: {}", debug.path().display())));
    assert_eq!(fs::read_dir(debug.path().join("capitalize_foo")).unwrap().count(), 1);
}

#[test]
fn filter_selects_tests() {
    let dir = suite("");
    fs::write(dir.path().join("library.yaml"), PASSING_TABLE).unwrap();

    let output = run(dir.path(), &["--filter", "current_"]);
    let stdout = text(&output.stdout);
    assert!(output.status.success(), "{stdout}");
    assert!(stdout.ends_with("2 passed, 0 failed\n"));
}

#[test]
fn junit_output() {
    let dir = suite("");
    fs::write(dir.path().join("failing.yaml"), FAILING_TABLE).unwrap();

    let output = run(dir.path(), &["--output", "junit"]);
    let stdout = text(&output.stdout);
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout.starts_with("<?xml"));
    assert!(stdout.contains("<testsuites tests=\"1\" failures=\"1\""));
    assert!(stdout.contains("<testcase name=\"capitalize foo\""));
}

#[test]
fn json_output() {
    let dir = suite("");
    fs::write(dir.path().join("library.yaml"), PASSING_TABLE).unwrap();

    let output = run(dir.path(), &["--output", "json"]);
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["passed"], 6);
    assert_eq!(value["failed"], 0);
    assert_eq!(value["results"][0]["tests"][0]["passed"], true);
}

#[test]
fn timeout_flag_aborts_hung_scripts() {
    let dir = suite("");
    fs::write(dir.path().join("hang.yaml"), sleep_table("hang", 30.0)).unwrap();

    let start = Instant::now();
    let output = run(dir.path(), &["--timeout", "1"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(text(&output.stdout).contains("did not finish within"), "{}", text(&output.stdout));
    assert!(start.elapsed().as_secs_f64() < 10.0);
}

#[test]
fn zero_timeout_disables_the_watchdog() {
    let dir = suite("timeout: 1\n");
    fs::write(dir.path().join("slow.yaml"), sleep_table("slow", 1.5)).unwrap();

    let output = run(dir.path(), &["--timeout", "0"]);
    let stdout = text(&output.stdout);
    assert!(output.status.success(), "{stdout}");
    assert!(stdout.ends_with("1 passed, 0 failed\n"), "{stdout}");
}

#[test]
fn suite_prefetch_runs_before_tables() {
    let dir = suite("");
    let marker = dir.path().join("warmed");
    let config = format!(
        "prefetch:\n  - cmd: sh\n    args: [\"-c\", \"echo noisy; echo noisy >&2; echo $TOOL > '{}'\"]\n    env:\n      TOOL: modscope\n",
        marker.display()
    );
    let existing = fs::read_to_string(dir.path().join("shellharness.yaml")).unwrap();
    fs::write(dir.path().join("shellharness.yaml"), existing + &config).unwrap();
    fs::write(
        dir.path().join("warm.yaml"),
        format!(
            "version: 1\ntests:\n  - name: warmed\n    commands: [\"cat '{}'\"]\n    stdout:\n      lines: [modscope]\n",
            marker.display()
        ),
    )
    .unwrap();

    let output = run(dir.path(), &[]);
    let stdout = text(&output.stdout);
    assert!(output.status.success(), "{stdout}\n{}", text(&output.stderr));
    assert!(!stdout.contains("noisy"), "{stdout}");
    assert!(stdout.ends_with("1 passed, 0 failed\n"), "{stdout}");
}

#[test]
fn failing_suite_prefetch_stops_the_run() {
    let dir = suite("prefetch:\n  - cmd: sh\n    args: [\"-c\", \"echo cannot download >&2; exit 3\"]\n");
    fs::write(dir.path().join("library.yaml"), PASSING_TABLE).unwrap();

    let output = run(dir.path(), &[]);
    let stderr = text(&output.stderr);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr.contains("Suite prefetch failed"), "{stderr}");
    assert!(stderr.contains("cannot download"), "{stderr}");
    assert!(!text(&output.stdout).contains("current_context"));
}

#[test]
fn tables_run_in_parallel_by_default() {
    let dir = suite("");
    fs::write(dir.path().join("a.yaml"), sleep_table("sleep1", 0.5)).unwrap();
    fs::write(dir.path().join("b.yaml"), sleep_table("sleep2", 0.5)).unwrap();

    let start = Instant::now();
    let output = run(dir.path(), &[]);
    let elapsed = start.elapsed();

    assert!(output.status.success(), "{}", text(&output.stdout));
    // Serially this would take at least a second
    assert!(
        elapsed.as_secs_f64() < 0.95,
        "Tables took {:.2}s to run (expected < 0.95s for parallel execution)",
        elapsed.as_secs_f64()
    );
}

#[test]
fn tables_run_serially_when_configured() {
    let dir = suite("serial: true\n");
    fs::write(dir.path().join("a.yaml"), sleep_table("sleep1", 0.2)).unwrap();
    fs::write(dir.path().join("b.yaml"), sleep_table("sleep2", 0.2)).unwrap();

    let start = Instant::now();
    let output = run(dir.path(), &[]);
    let elapsed = start.elapsed();

    assert!(output.status.success(), "{}", text(&output.stdout));
    assert!(
        elapsed.as_secs_f64() >= 0.35,
        "Tables took {:.2}s to run (expected >= 0.35s for serial execution)",
        elapsed.as_secs_f64()
    );
}

#[test]
fn results_keep_file_order() {
    let dir = suite("");
    fs::write(dir.path().join("a_first.yaml"), sleep_table("first", 0.3)).unwrap();
    fs::write(dir.path().join("b_second.yaml"), sleep_table("second", 0.0)).unwrap();

    let output = run(dir.path(), &[]);
    let stdout = text(&output.stdout);
    let first = stdout.find("a_first.yaml").unwrap();
    let second = stdout.find("b_second.yaml").unwrap();
    assert!(first < second, "{stdout}");
}

#[test]
fn load_errors_count_as_failures() {
    let dir = suite("");
    fs::write(dir.path().join("broken.yaml"), "invalid: [yaml: {").unwrap();

    let output = run(dir.path(), &[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(text(&output.stderr).contains("Failed to load"));
    assert!(text(&output.stdout).ends_with("0 passed, 1 failed\n"));
}

#[test]
fn validate_rejects_unknown_preset() {
    let dir = suite("");
    fs::write(
        dir.path().join("helm.yaml"),
        "version: 1\nscripts:\n  - preset: helm\ntests:\n  - name: \"true\"\n",
    )
    .unwrap();

    let output = shellharness_cmd().arg("validate").arg(dir.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let all = text(&output.stdout) + &text(&output.stderr);
    assert!(all.contains("unknown preset \"helm\""), "{all}");
}

#[test]
fn schema_is_json() {
    let output = shellharness_cmd().arg("schema").output().unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(value["properties"]["tests"].is_object());
}
