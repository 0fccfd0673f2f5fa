//! Runs the fixture library in `tests/scripts` through the harness.

use shellharness::check::{contains, empty, equal, lines, matches};
use shellharness::mock::response;
use shellharness::{
    Harness, HarnessConfig, HarnessError, Invocation, ShellScript, TestCase, any_args,
    call_original, envs, exact, load, mock_binary, presets, simply, starts_with,
};
use std::thread;
use std::time::Duration;

fn config() -> HarnessConfig {
    HarnessConfig::new(env!("CARGO_MANIFEST_DIR"))
        .with_scripts_dir("tests/scripts")
        .with_script_dir("tests")
}

fn harness() -> Harness {
    Harness::new(config()).unwrap()
}

fn library() -> ShellScript {
    ShellScript::new().with(load(["library.bash"]))
}

#[test]
fn protected_registries() {
    harness().assert_cases(
        &library(),
        &[
            TestCase::new(r#"is_protected_gcr "gcr.io/knative-releases""#),
            TestCase::new(r#"is_protected_gcr "gcr.io/knative-nightly/""#).stdout(empty()),
            TestCase::new(r#"is_protected_gcr "gcr.io/knative-foobar""#).retcode(1),
            TestCase::new(r#"is_protected_gcr "gcr.io/foobar-releases""#).retcode(1),
            TestCase::new(r#"is_protected_gcr """#).retcode(1),
        ],
    );
}

#[test]
fn protected_projects_and_clusters() {
    harness().assert_cases(
        &library(),
        &[
            TestCase::new(r#"is_protected_project "knative-tests""#),
            TestCase::new(r#"is_protected_project "knative-foobar""#).retcode(1),
            TestCase::new(r#"is_protected_cluster "gke_knative-tests_us-central1_prow""#),
            TestCase::new(r#"is_protected_cluster "gke_deadbeef_1.24""#).retcode(1),
        ],
    );
}

#[test]
fn string_helpers() {
    harness().assert_cases(
        &library(),
        &[
            TestCase::new("capitalize foo bar").stdout(lines(["Foo Bar"])),
            TestCase::new("major_minor_version v1.24.3").stdout(equal("1.24\n")),
        ],
    );
}

#[test]
fn date_is_frozen() {
    harness().assert_case(
        &library(),
        &TestCase::new("current_time").stdout(lines([presets::FROZEN_DATE])),
    );
}

#[test]
fn wait_until_pods_running_with_kubectl_mock() {
    let script = library().with(presets::mock_kubectl([]));
    harness().assert_cases(
        &script,
        &[
            TestCase::new("wait_until_pods_running knative-serving").stdout(lines([
                "Waiting until all pods in namespace knative-serving are up",
                "All pods are up:",
                "beef-e3c1 1/1 Running 0 2s",
                "beef-f4d2 1/1 Running 0 2s",
            ])),
            TestCase::new("current_context").stdout(lines(["gke_deadbeef_1.24"])),
        ],
    );
}

#[test]
fn kubectl_extra_responses_override_defaults() {
    let script = library().with(presets::mock_kubectl([response(
        exact("config current-context"),
        simply("kind-kind"),
    )]));
    harness().assert_case(
        &script,
        &TestCase::new("current_context").stdout(lines(["kind-kind"])),
    );
}

#[test]
fn unmatched_invocation_prints_fallback() {
    let script = library().with(mock_binary("ko"));
    harness().assert_case(
        &script,
        &TestCase::new("deploy").stdout(lines(["👻 ko apply -f config/"])),
    );
}

#[test]
fn abort_goes_to_stderr_with_failure_exit() {
    harness().assert_cases(
        &library(),
        &[
            TestCase::new("abort something broke").stderr([contains("ERROR: something broke")]),
            TestCase::new("warning careful")
                .retcode(0)
                .stderr(equal("WARNING: careful\n")),
        ],
    );
}

#[test]
fn stderr_check_without_failure_exit_fails() {
    let h = harness();
    let result = h
        .run_case(
            &library(),
            &TestCase::new("warning careful").stderr([contains("careful")]),
        )
        .unwrap();
    assert!(!result.passed);
    assert_eq!(result.failures, vec!["Exit code: expected non-zero, got 0"]);
}

#[test]
fn fragments_load_in_order() {
    let script = ShellScript::new().with(load(["library.bash", "release.bash"]));
    harness().assert_cases(
        &script,
        &[
            TestCase::new("hash_from_tag v20180718-deadbeef").stdout(lines(["deadbeef"])),
            TestCase::new("release_branch v1.24.3").stdout(lines(["release-1.24"])),
            TestCase::new("hash_from_tag").stderr([contains("missing tag")]),
        ],
    );
}

#[test]
fn reports_land_in_private_artifacts() {
    harness().assert_case(
        &library(),
        &TestCase::new("write_report")
            .commands([
                r#"write_report "all good""#,
                r#"test "$(dirname "${ARTIFACTS}")" = "$(dirname "${TMPPATH}")""#,
            ])
            .stdout(lines(["[2018-07-18 23:00:00] all good"])),
    );
}

#[test]
fn fake_ci_job_environment() {
    let ci = library().with(presets::fake_ci_job());
    harness().assert_cases(
        &ci,
        &[
            TestCase::new("identity_token").stdout(lines([presets::FAKE_IDENTITY_TOKEN])),
            TestCase::new("gsutil cp a gs://b").stdout(lines(["👻 gsutil cp a gs://b"])),
            TestCase::new("echo \"${JOB_TYPE}/${PULL_NUMBER}\"").stdout(lines(["presubmit/1"])),
            TestCase::new("is_verbose").retcode(1),
        ],
    );
    harness().assert_case(
        &library(),
        &TestCase::new("identity_token").stderr([contains("not running in a CI job")]),
    );
}

#[test]
fn exported_variables_and_regex_checks() {
    let script = library().with(envs([("CLUSTER", "gke_knative-tests_us-east1_e2e")]));
    harness().assert_case(
        &script,
        &TestCase::new("check")
            .commands([r#"is_protected_cluster "${CLUSTER}" && echo "protected ${CLUSTER}""#])
            .stdout([matches(r"^protected gke_\S+\n$").unwrap()]),
    );
}

#[test]
fn first_matching_pattern_wins() {
    let git = mock_binary("git")
        .respond(exact("describe --always"), simply("v1.24.3"))
        .respond(starts_with("describe"), Invocation::output("v0.0.0").exit(0))
        .respond(starts_with("push"), Invocation::fail(128))
        .respond(any_args(), simply("unreachable fallback"));
    let script = library().with(git);
    harness().assert_cases(
        &script,
        &[
            TestCase::new("git describe --always").stdout(lines(["v1.24.3"])),
            TestCase::new("git describe --tags").stdout(lines(["v0.0.0"])),
            TestCase::new("git push origin main").retcode(128),
            TestCase::new("git status").stdout(lines(["unreachable fallback"])),
        ],
    );
}

#[test]
fn call_original_runs_real_program() {
    let script = library().with(
        mock_binary("expr")
            .respond(starts_with("1 +"), call_original())
            .respond(any_args(), simply("mocked")),
    );
    harness().assert_cases(
        &script,
        &[
            TestCase::new("expr 1 + 2").stdout(lines(["3"])),
            TestCase::new("expr 2 + 2").stdout(lines(["mocked"])),
        ],
    );
}

#[test]
fn concurrent_tests_see_their_own_mocks() {
    let h = harness();
    thread::scope(|s| {
        for i in 0..8 {
            let h = &h;
            s.spawn(move || {
                let answer = format!("answer-{i}");
                let script =
                    library().with(mock_binary("oracle").respond(any_args(), simply(&answer)));
                h.assert_case(
                    &script,
                    &TestCase::new("oracle")
                        .commands(["sleep 0.1", "oracle"])
                        .stdout(lines([answer.as_str()])),
                );
            });
        }
    });
}

#[test]
fn failing_case_persists_script() {
    let debug = tempfile::tempdir().unwrap();
    let h = Harness::new(config().with_debug_dir(debug.path())).unwrap();
    let result = h
        .run_case(
            &library(),
            &TestCase::new("capitalize foo").stdout(lines(["foo"])),
        )
        .unwrap();
    assert!(!result.passed);
    let script = result.script.expect("script is persisted on failure");
    assert!(script.starts_with(debug.path().join("capitalize_foo")));
    let source = std::fs::read_to_string(&script).unwrap();
    assert!(source.starts_with("#!/usr/bin/env bash\n"));
    assert!(source.contains("function capitalize()"));
    assert!(source.ends_with("capitalize foo\n"));
    assert!(result.failures[0].contains("  - foo"));
    assert!(result.failures[0].contains("  + Foo"));
}

#[test]
fn generated_scripts_are_cleaned_up() {
    let dir = tempfile::tempdir().unwrap();
    let config = HarnessConfig::new(dir.path()).with_scripts_dir(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/scripts"
    ));
    let h = Harness::new(config).unwrap();
    h.assert_cases(
        &library(),
        &[
            TestCase::new("capitalize a").stdout(lines(["A"])),
            TestCase::new("true"),
        ],
    );
    let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[test]
fn missing_fragment_is_a_harness_error() {
    let err = harness()
        .run_case(
            &ShellScript::new().with(load(["nope.bash"])),
            &TestCase::new("true"),
        )
        .unwrap_err();
    assert!(matches!(err, HarnessError::Fragment { .. }));
}

#[test]
fn watchdog_times_out() {
    let h = Harness::new(config().with_timeout(Duration::from_secs(1))).unwrap();
    let err = h
        .run_case(&library(), &TestCase::new("sleep 20"))
        .unwrap_err();
    assert!(err.is_timeout(), "{err}");
}
