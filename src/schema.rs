//! Schema definitions for test table files.
//!
//! A table file names the scriptlets to assemble and the cases to run
//! against them. Tables are written in YAML or TOML and validated against
//! these types.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The table format version this crate reads.
pub const TABLE_VERSION: u32 = 1;

/// Root document for a test table file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TableSpec {
    /// Table format version; only [`TABLE_VERSION`] is accepted.
    pub version: u32,

    /// Scriptlets making up the program under test, in order.
    #[serde(default)]
    pub scripts: Vec<ScriptletSpec>,

    /// The cases run against the assembled program.
    pub tests: Vec<TestEntry>,
}

/// A scriptlet of the program under test.
///
/// Each entry is a single-key map where the key determines the kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct ScriptletSpec {
    /// Library fragments to load from the scripts directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load: Option<Vec<String>>,

    /// Literal shell statements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<Vec<String>>,

    /// Variables to export, in order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envs: Option<IndexMap<String, String>>,

    /// A mock binary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock: Option<MockSpec>,

    /// A preset from the registry, by name or with extra responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<PresetSpec>,
}

impl ScriptletSpec {
    /// The keys set on this entry.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds = Vec::new();
        if self.load.is_some() {
            kinds.push("load");
        }
        if self.instructions.is_some() {
            kinds.push("instructions");
        }
        if self.envs.is_some() {
            kinds.push("envs");
        }
        if self.mock.is_some() {
            kinds.push("mock");
        }
        if self.preset.is_some() {
            kinds.push("preset");
        }
        kinds
    }
}

/// A mock binary definition.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MockSpec {
    /// Program name the mock stands in for.
    pub name: String,

    /// Rules tried in order; the first match wins.
    #[serde(default)]
    pub responses: Vec<ResponseSpec>,
}

/// One rule of a mock.
///
/// `exact` or `prefix` select the arguments; with neither, the rule matches
/// any invocation. Setting both is an error, as is `call_original` together
/// with `output` or `exit`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ResponseSpec {
    /// Match the joined arguments exactly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<String>,

    /// Match joined arguments starting with this prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Canned output, printed line by line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Exit code of the canned response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<i32>,

    /// Pass the invocation through to the real program.
    #[serde(default)]
    pub call_original: bool,
}

/// A preset reference.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum PresetSpec {
    /// Just the preset name.
    Name(String),

    /// The preset name with responses consulted before the preset's own.
    Detailed {
        name: String,
        #[serde(default)]
        responses: Vec<ResponseSpec>,
    },
}

impl PresetSpec {
    pub fn name(&self) -> &str {
        match self {
            PresetSpec::Name(name) | PresetSpec::Detailed { name, .. } => name,
        }
    }

    pub fn responses(&self) -> &[ResponseSpec] {
        match self {
            PresetSpec::Name(_) => &[],
            PresetSpec::Detailed { responses, .. } => responses,
        }
    }
}

/// A single test case.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TestEntry {
    /// Test name; also the command when `commands` is empty.
    pub name: String,

    /// Commands appended to the program.
    #[serde(default)]
    pub commands: Vec<String>,

    /// Expected exit code. Defaults to non-zero when stderr is checked, else 0.
    #[serde(default)]
    pub retcode: Option<i32>,

    /// Expected stdout. Omitted means empty.
    #[serde(default)]
    pub stdout: Option<StreamExpect>,

    /// Expected stderr. Omitted means empty.
    #[serde(default)]
    pub stderr: Option<StreamExpect>,
}

/// One matcher or a list of matchers, all of which must hold.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum StreamExpect {
    Many(Vec<OutputMatch>),
    One(OutputMatch),
}

impl StreamExpect {
    pub fn matchers(&self) -> Vec<&OutputMatch> {
        match self {
            StreamExpect::Many(all) => all.iter().collect(),
            StreamExpect::One(one) => vec![one],
        }
    }
}

/// Matching rules for stdout/stderr.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum OutputMatch {
    /// Exact string match.
    Exact(String),

    /// Structured match with multiple options.
    Structured(OutputMatchStructured),
}

/// Structured output matching with multiple match types.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct OutputMatchStructured {
    /// Exact string match.
    #[serde(default)]
    pub equals: Option<String>,

    /// Exact match against these lines, each newline terminated.
    #[serde(default)]
    pub lines: Option<Vec<String>>,

    /// Substring match.
    #[serde(default)]
    pub contains: Option<String>,

    /// Regular expression match.
    #[serde(default)]
    pub regex: Option<String>,
}

/// Generate JSON Schema for table files.
pub fn generate_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(TableSpec)
}
