//! Script assembly.
//!
//! Turns a [`ShellScript`] into the text of one self-contained program:
//! interpreter line, bootstrap environment, every scriptlet as its own block,
//! then the test commands.

use crate::config::HarnessConfig;
use crate::context::TestContext;
use crate::error::Result;
use crate::mock::shell_quote;
use crate::prefetch::{Prefetcher, prefetch};
use crate::presets;
use crate::scriptlet::Scriptlet;
use regex::Regex;
use std::sync::LazyLock;

/// The single interpreter line at the top of every assembled script.
pub const INTERPRETER_LINE: &str = "#!/usr/bin/env bash";

static FULL_LINE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#.*$").expect("comment regex is valid"));
static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("newline regex is valid"));

/// An ordered list of scriptlets making up the program under test.
///
/// Every script starts with a `date` mock printing a frozen timestamp, so
/// library output that embeds the current time is deterministic.
pub struct ShellScript {
    scriptlets: Vec<Box<dyn Scriptlet>>,
}

impl std::fmt::Debug for ShellScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellScript")
            .field("scriptlets", &self.scriptlets.len())
            .finish()
    }
}

impl Default for ShellScript {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellScript {
    pub fn new() -> Self {
        Self {
            scriptlets: vec![Box::new(presets::mock_date())],
        }
    }

    /// Appends a scriptlet.
    #[must_use]
    pub fn with(mut self, scriptlet: impl Scriptlet + 'static) -> Self {
        self.scriptlets.push(Box::new(scriptlet));
        self
    }

    pub fn push(&mut self, scriptlet: Box<dyn Scriptlet>) {
        self.scriptlets.push(scriptlet);
    }

    /// Every prefetcher carried by the scriptlets, in order.
    pub fn prefetchers(&self) -> Vec<&dyn Prefetcher> {
        self.scriptlets.iter().flat_map(|s| s.prefetchers()).collect()
    }

    /// Runs the warm-ups this script depends on.
    pub fn prefetch(&self, config: &HarnessConfig) -> Result<()> {
        for p in self.prefetchers() {
            prefetch(p, config)?;
        }
        Ok(())
    }

    /// Renders the full program for one test.
    ///
    /// Full-line comments (a `#` in column 0) are removed from the bootstrap
    /// and every scriptlet, fragment interpreter lines included. The commands
    /// are appended after that, untouched. Runs of blank lines collapse to one.
    pub fn source(&self, ctx: &TestContext, commands: &[String]) -> Result<String> {
        let mut blocks = vec![bootstrap(ctx)];
        for scriptlet in &self.scriptlets {
            blocks.push(scriptlet.render(ctx)?);
        }
        let body = blocks.join("\n\n");
        let body = FULL_LINE_COMMENT.replace_all(&body, "");

        let mut source = format!("{INTERPRETER_LINE}\n\n{body}\n\n");
        for command in commands {
            source.push_str(command);
            source.push('\n');
        }
        Ok(EXCESS_NEWLINES.replace_all(&source, "\n\n").into_owned())
    }
}

fn bootstrap(ctx: &TestContext) -> String {
    let config = ctx.config();
    let mut lines = Vec::new();
    if config.strict {
        lines.push("set -Eeuo pipefail".to_string());
    }
    lines.push(format!(
        "export TMPPATH={}",
        shell_quote(&ctx.tmp_path().to_string_lossy())
    ));
    match &config.toolchain_root {
        Some(root) => lines.push(format!(
            "export PATH=\"${{TMPPATH}}:\"{}\":${{PATH}}\"",
            shell_quote(&root.join("bin").to_string_lossy())
        )),
        None => lines.push("export PATH=\"${TMPPATH}:${PATH}\"".to_string()),
    }
    if let Some(var) = &config.manual_verbose_var {
        lines.push(format!("export {var}=true"));
    }
    if let Some(var) = &config.artifacts_var {
        lines.push(format!(
            "export {var}={}",
            shell_quote(&ctx.artifacts().to_string_lossy())
        ));
    }
    for (k, v) in &config.env {
        lines.push(format!("export {k}=\"{v}\""));
    }
    lines.join("\n")
}
