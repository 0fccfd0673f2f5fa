//! Mock binary forge.
//!
//! A [`MockBinary`] replaces an external program for the duration of one test.
//! It renders to shell that writes an executable into `TMPPATH`:
//!
//! ```text
//! #!/usr/bin/env bash
//! if [[ "$*" == 'config current-context' ]]; then
//!   printf '%s\n' 'gke_deadbeef_1.24'
//!   exit $?
//! fi
//! echo "👻 "'kubectl'" $*"
//! ```
//!
//! Patterns are tried in declaration order and the first match wins. An
//! invocation nothing matches prints the fallback line and exits 0, which makes
//! unexpected calls visible in the captured stdout without failing the script.

use crate::context::TestContext;
use crate::error::{HarnessError, Result};
use crate::scriptlet::Scriptlet;
use std::path::{Path, PathBuf};

/// Marker printed by the fallback branch of every mock.
pub const FALLBACK_MARKER: &str = "👻";

const INTERPRETER_LINE: &str = "#!/usr/bin/env bash";
const HEREDOC_DELIMITER: &str = "__SHELLHARNESS_MOCK__";

/// Quotes `s` for bash using single quotes.
pub(crate) fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Predicate over the space-joined argument string (`"$*"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgPattern {
    /// The arguments equal this string.
    Exact(String),
    /// The arguments start with this string.
    Prefix(String),
    /// Any arguments, including none.
    Any,
}

impl ArgPattern {
    /// The right-hand side of `[[ "$*" == ... ]]`.
    pub fn to_shell(&self) -> String {
        match self {
            ArgPattern::Exact(s) => shell_quote(s),
            ArgPattern::Prefix(s) => format!("{}*", shell_quote(s)),
            ArgPattern::Any => "*".to_string(),
        }
    }

    /// Evaluates the pattern the way the generated shell does.
    pub fn matches(&self, args: &str) -> bool {
        match self {
            ArgPattern::Exact(s) => args == s,
            ArgPattern::Prefix(s) => args.starts_with(s.as_str()),
            ArgPattern::Any => true,
        }
    }
}

/// Matches exactly the given argument string.
pub fn exact(args: impl Into<String>) -> ArgPattern {
    ArgPattern::Exact(args.into())
}

/// Matches argument strings starting with `prefix`.
pub fn starts_with(prefix: impl Into<String>) -> ArgPattern {
    ArgPattern::Prefix(prefix.into())
}

/// Matches every invocation.
pub fn any_args() -> ArgPattern {
    ArgPattern::Any
}

/// What a mock does when its pattern matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Print canned lines and exit with `exit_code` (0 when unset).
    Simply {
        lines: Vec<String>,
        exit_code: Option<i32>,
    },
    /// Run the real program with the same arguments.
    CallOriginal,
}

impl Invocation {
    /// Prints `output` line by line. An empty string prints nothing.
    pub fn output(output: impl AsRef<str>) -> Self {
        Invocation::Simply {
            lines: output.as_ref().lines().map(str::to_string).collect(),
            exit_code: None,
        }
    }

    /// Prints nothing and exits with `code`.
    pub fn fail(code: i32) -> Self {
        Invocation::Simply {
            lines: Vec::new(),
            exit_code: Some(code),
        }
    }

    /// Sets the exit code of a canned response.
    #[must_use]
    pub fn exit(self, code: i32) -> Self {
        match self {
            Invocation::Simply { lines, .. } => Invocation::Simply {
                lines,
                exit_code: Some(code),
            },
            other => other,
        }
    }

    fn statements(&self, bin: &str, toolchain_root: Option<&Path>) -> Result<Vec<String>> {
        match self {
            Invocation::Simply { lines, exit_code } => {
                let mut out: Vec<String> = lines
                    .iter()
                    .map(|l| format!("  printf '%s\\n' {}", shell_quote(l)))
                    .collect();
                match exit_code {
                    Some(code) => out.push(format!("  exit {code}")),
                    None if out.is_empty() => out.push("  exit 0".to_string()),
                    None => out.push("  exit $?".to_string()),
                }
                Ok(out)
            }
            Invocation::CallOriginal => {
                let original = find_executable(bin, toolchain_root)?;
                Ok(vec![
                    format!(
                        "  {} \"$@\"",
                        shell_quote(&original.to_string_lossy())
                    ),
                    "  exit $?".to_string(),
                ])
            }
        }
    }
}

/// Passes the invocation through to the real program.
pub fn call_original() -> Invocation {
    Invocation::CallOriginal
}

/// Prints `output` line by line.
pub fn simply(output: impl AsRef<str>) -> Invocation {
    Invocation::output(output)
}

/// One `(pattern, invocation)` rule of a mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub args: ArgPattern,
    pub invocation: Invocation,
}

/// Pairs a pattern with what to do when it matches.
pub fn response(args: ArgPattern, invocation: Invocation) -> Response {
    Response { args, invocation }
}

/// A stand-in for an external program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockBinary {
    name: String,
    responses: Vec<Response>,
}

impl MockBinary {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responses: Vec::new(),
        }
    }

    /// Appends a rule. Earlier rules take precedence.
    #[must_use]
    pub fn respond(mut self, args: ArgPattern, invocation: Invocation) -> Self {
        self.responses.push(response(args, invocation));
        self
    }

    /// Appends rules. Earlier rules take precedence.
    #[must_use]
    pub fn responses(mut self, responses: impl IntoIterator<Item = Response>) -> Self {
        self.responses.extend(responses);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The invocation the mock performs for `args`, or `None` for the fallback.
    pub fn matching(&self, args: &str) -> Option<&Invocation> {
        self.responses
            .iter()
            .find(|r| r.args.matches(args))
            .map(|r| &r.invocation)
    }

    /// The complete executable, interpreter line included.
    pub fn executable(&self, toolchain_root: Option<&Path>) -> Result<String> {
        let mut lines = vec![INTERPRETER_LINE.to_string()];
        lines.extend(self.body(toolchain_root)?);
        lines.push(String::new());
        Ok(lines.join("\n"))
    }

    /// Writes the executable into `dir` with mode 0755 and returns its path.
    pub fn install(&self, dir: &Path, toolchain_root: Option<&Path>) -> Result<PathBuf> {
        let path = dir.join(&self.name);
        let source = self.executable(toolchain_root)?;
        write_executable(&path, &source)?;
        Ok(path)
    }

    fn body(&self, toolchain_root: Option<&Path>) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        for r in &self.responses {
            lines.push(format!("if [[ \"$*\" == {} ]]; then", r.args.to_shell()));
            lines.extend(r.invocation.statements(&self.name, toolchain_root)?);
            lines.push("fi".to_string());
        }
        lines.push(format!(
            "echo \"{FALLBACK_MARKER} \"{}\" $*\"",
            shell_quote(&self.name)
        ));
        Ok(lines)
    }
}

impl Scriptlet for MockBinary {
    fn render(&self, ctx: &TestContext) -> Result<String> {
        let target = format!("\"${{TMPPATH}}\"/{}", shell_quote(&self.name));
        let mut lines = vec![
            format!("printf '%s\\n' '{INTERPRETER_LINE}' > {target}"),
            format!("cat >> {target} <<'{HEREDOC_DELIMITER}'"),
        ];
        lines.extend(self.body(ctx.config().toolchain_root.as_deref())?);
        lines.push(HEREDOC_DELIMITER.to_string());
        lines.push(format!("chmod +x {target}"));
        Ok(lines.join("\n"))
    }
}

/// Shorthand for [`MockBinary::new`].
pub fn mock_binary(name: impl Into<String>) -> MockBinary {
    MockBinary::new(name)
}

/// Resolves the real program behind `name`.
///
/// `<toolchain_root>/bin/<name>` wins when it exists and is executable,
/// otherwise `PATH` is searched.
pub fn find_executable(name: &str, toolchain_root: Option<&Path>) -> Result<PathBuf> {
    if let Some(root) = toolchain_root {
        let candidate = root.join("bin").join(name);
        if is_executable(&candidate) {
            return Ok(candidate);
        }
    }
    which::which(name).map_err(|source| HarnessError::ExecutableNotFound {
        name: name.to_string(),
        source,
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

pub(crate) fn write_executable(path: &Path, contents: &str) -> Result<()> {
    let write_err = |source| HarnessError::Write {
        path: path.to_path_buf(),
        source,
    };
    std::fs::write(path, contents).map_err(write_err)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .map_err(write_err)?;
    }
    Ok(())
}
