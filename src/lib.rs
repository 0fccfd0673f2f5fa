//! A test harness for shell-script libraries.
//!
//! Tests compose a [`ShellScript`] from scriptlets (library fragments, literal
//! statements, exported variables and [`MockBinary`] stand-ins for every
//! external program), append the commands under test and assert on what the
//! assembled program printed and how it exited:
//!
//! ```no_run
//! use shellharness::check::contains;
//! use shellharness::{Harness, HarnessConfig, ShellScript, TestCase, load, presets};
//!
//! let harness = Harness::new(
//!     HarnessConfig::new(env!("CARGO_MANIFEST_DIR")).with_scripts_dir("tests/scripts"),
//! )
//! .unwrap();
//! let script = ShellScript::new()
//!     .with(load(["library.bash"]))
//!     .with(presets::mock_kubectl([]));
//! harness.assert_case(
//!     &script,
//!     &TestCase::new("wait_until_pods_running knative-serving").stdout([contains("are up")]),
//! );
//! ```

pub mod app;
pub mod assembler;
pub mod check;
pub mod config;
pub mod context;
pub mod env;
pub mod error;
pub mod loader;
pub mod mock;
pub mod prefetch;
pub mod presets;
pub mod report;
pub mod runner;
pub mod schema;
pub mod scriptlet;
pub mod table;
pub mod testcase;

pub use assembler::ShellScript;
pub use config::HarnessConfig;
pub use context::TestContext;
pub use error::{HarnessError, Result};
pub use mock::{
    ArgPattern, Invocation, MockBinary, any_args, call_original, exact, mock_binary, simply,
    starts_with,
};
pub use prefetch::{CommandPrefetcher, Prefetcher};
pub use runner::{ExecutionResult, Harness};
pub use scriptlet::{Scriptlet, envs, instructions, load, union};
pub use testcase::{TestCase, TestResult};
