//! Ready-made mocks for the tools the hack library shells out to.
//!
//! Presets are plain constructors. Table files refer to them by name through
//! the [`Registry`].

use crate::error::{HarnessError, Result};
use crate::mock::{
    MockBinary, Response, any_args, call_original, exact, mock_binary, simply, starts_with,
};
use crate::prefetch::CommandPrefetcher;
use crate::scriptlet::{Prefetching, Scriptlet, Union, envs};
use std::collections::BTreeMap;

/// The timestamp every script's `date` prints.
pub const FROZEN_DATE: &str = "2018-07-18 23:00:00";

/// Identity token the fake `gcloud` hands out.
pub const FAKE_IDENTITY_TOKEN: &str = "F4KE-T0K3N-3B49";

/// `date` frozen at [`FROZEN_DATE`], whatever the arguments.
pub fn mock_date() -> MockBinary {
    mock_binary("date").respond(any_args(), simply(FROZEN_DATE))
}

/// `kubectl` answering the current context and listing two running pods.
///
/// `extra` responses are consulted before the defaults.
pub fn mock_kubectl(extra: impl IntoIterator<Item = Response>) -> MockBinary {
    mock_binary("kubectl")
        .responses(extra)
        .respond(exact("config current-context"), simply("gke_deadbeef_1.24"))
        .respond(
            starts_with("get pods --no-headers -n"),
            simply("beef-e3c1 1/1 Running 0 2s\nbeef-f4d2 1/1 Running 0 2s"),
        )
}

/// `gcloud` handing out a fake identity token.
///
/// `extra` responses are consulted before the defaults.
pub fn mock_gcloud(extra: impl IntoIterator<Item = Response>) -> MockBinary {
    mock_binary("gcloud")
        .responses(extra)
        .respond(exact("auth print-identity-token"), simply(FAKE_IDENTITY_TOKEN))
}

/// `go` passing tool runs and read-only queries through to the real toolchain.
///
/// Each of `tools` is passed through for `go run <tool>` and prefetched with
/// `go run <tool> --help` before the script runs. `extra` responses are
/// consulted before the pass-throughs.
pub fn mock_go<I, S>(tools: I, extra: impl IntoIterator<Item = Response>) -> Prefetching
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let tools: Vec<String> = tools.into_iter().map(Into::into).collect();
    let mut mock = mock_binary("go").responses(extra);
    for tool in &tools {
        mock = mock.respond(starts_with(format!("run {tool}")), call_original());
    }
    let mock = mock
        .respond(starts_with("run ./"), call_original())
        .respond(starts_with("list"), call_original())
        .respond(starts_with("env"), call_original())
        .respond(starts_with("version"), call_original());

    tools
        .into_iter()
        .fold(Prefetching::new(mock), |p, tool| {
            p.with(CommandPrefetcher::go_run_help(tool))
        })
}

/// The environment and mocks of a CI job run.
///
/// Exports the job metadata a CI system provides and stubs the cloud and
/// release tooling a job would invoke.
pub fn fake_ci_job() -> Union {
    Union::new()
        .with(envs([
            ("CI", "true"),
            ("PROW_JOB_ID", "f4ke-j0b-1d"),
            ("BUILD_ID", "1000000000000000000"),
            ("JOB_NAME", "pull-shellharness-unit-tests"),
            ("JOB_TYPE", "presubmit"),
            ("REPO_OWNER", "shellharness"),
            ("REPO_NAME", "hack"),
            ("PULL_NUMBER", "1"),
        ]))
        .with(mock_gcloud([]))
        .with(mock_binary("java"))
        .with(mock_binary("mvn"))
        .with(mock_binary("ko"))
        .with(mock_binary("cosign"))
        .with(mock_binary("rcodesign"))
        .with(mock_binary("gsutil"))
        .with(mock_binary("kubetest2"))
}

/// Arguments a preset is built with.
#[derive(Debug, Clone, Default)]
pub struct PresetArgs {
    /// Responses consulted before the preset's own.
    pub responses: Vec<Response>,
    /// `go run` targets to pass through and prefetch.
    pub go_tools: Vec<String>,
}

type PresetFn = fn(&PresetArgs) -> Box<dyn Scriptlet>;

/// Preset constructors by name.
pub struct Registry {
    presets: BTreeMap<&'static str, PresetFn>,
}

impl Registry {
    /// The presets shipped with the crate.
    pub fn builtin() -> Self {
        let mut presets: BTreeMap<&'static str, PresetFn> = BTreeMap::new();
        presets.insert("date", |args| {
            mock_binary("date")
                .responses(args.responses.clone())
                .respond(any_args(), simply(FROZEN_DATE))
                .boxed()
        });
        presets.insert("kubectl", |args| {
            mock_kubectl(args.responses.clone()).boxed()
        });
        presets.insert("gcloud", |args| {
            mock_gcloud(args.responses.clone()).boxed()
        });
        presets.insert("go", |args| {
            mock_go(args.go_tools.clone(), args.responses.clone()).boxed()
        });
        presets.insert("fake-ci-job", |_| fake_ci_job().boxed());
        Self { presets }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.presets.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.presets.keys().copied()
    }

    /// Builds the named preset.
    pub fn build(&self, name: &str, args: &PresetArgs) -> Result<Box<dyn Scriptlet>> {
        self.presets
            .get(name)
            .map(|build| build(args))
            .ok_or_else(|| HarnessError::UnknownPreset(name.to_string()))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}
