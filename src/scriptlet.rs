//! Composable producers of shell source.
//!
//! A [`Scriptlet`] renders a fragment of shell against a [`TestContext`].
//! Scriptlets are immutable once built and rendering is pure, so the same
//! scriptlet can be shared by every case of a table.

use crate::context::TestContext;
use crate::error::{HarnessError, Result};
use crate::prefetch::Prefetcher;
use std::path::PathBuf;

/// A producer of shell source.
pub trait Scriptlet: Send + Sync {
    /// Renders this fragment for one test.
    fn render(&self, ctx: &TestContext) -> Result<String>;

    /// Warm-ups that must complete before a script containing this fragment runs.
    fn prefetchers(&self) -> Vec<&dyn Prefetcher> {
        Vec::new()
    }

    /// Boxes this scriptlet for use in a heterogeneous list.
    fn boxed(self) -> Box<dyn Scriptlet>
    where
        Self: Sized + 'static,
    {
        Box::new(self)
    }
}

impl Scriptlet for Box<dyn Scriptlet> {
    fn render(&self, ctx: &TestContext) -> Result<String> {
        (**self).render(ctx)
    }

    fn prefetchers(&self) -> Vec<&dyn Prefetcher> {
        (**self).prefetchers()
    }
}

/// Library fragments read from the configured scripts directory.
#[derive(Debug, Clone)]
pub struct LoadFile {
    names: Vec<String>,
}

impl Scriptlet for LoadFile {
    fn render(&self, ctx: &TestContext) -> Result<String> {
        let dir = &ctx.config().scripts_dir;
        let mut parts = Vec::with_capacity(self.names.len());
        for name in &self.names {
            let path: PathBuf = dir.join(name);
            let contents = std::fs::read_to_string(&path)
                .map_err(|source| HarnessError::Fragment { path, source })?;
            parts.push(contents.trim_end_matches('\n').to_string());
        }
        Ok(parts.join("\n\n"))
    }
}

/// Literal shell statements.
#[derive(Debug, Clone)]
pub struct Instructions {
    lines: Vec<String>,
}

impl Scriptlet for Instructions {
    fn render(&self, _ctx: &TestContext) -> Result<String> {
        Ok(self.lines.join("\n"))
    }
}

/// Concatenation of scriptlets, in order.
#[derive(Default)]
pub struct Union {
    parts: Vec<Box<dyn Scriptlet>>,
}

impl Union {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a scriptlet.
    #[must_use]
    pub fn with(mut self, part: impl Scriptlet + 'static) -> Self {
        self.parts.push(Box::new(part));
        self
    }

    pub fn push(&mut self, part: Box<dyn Scriptlet>) {
        self.parts.push(part);
    }
}

impl Scriptlet for Union {
    fn render(&self, ctx: &TestContext) -> Result<String> {
        let rendered = self
            .parts
            .iter()
            .map(|p| p.render(ctx))
            .collect::<Result<Vec<_>>>()?;
        Ok(rendered.join("\n\n"))
    }

    fn prefetchers(&self) -> Vec<&dyn Prefetcher> {
        self.parts.iter().flat_map(|p| p.prefetchers()).collect()
    }
}

/// A scriptlet that depends on network-fetched tools.
pub struct Prefetching {
    delegate: Box<dyn Scriptlet>,
    prefetchers: Vec<Box<dyn Prefetcher>>,
}

impl Prefetching {
    pub fn new(delegate: impl Scriptlet + 'static) -> Self {
        Self {
            delegate: Box::new(delegate),
            prefetchers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, prefetcher: impl Prefetcher + 'static) -> Self {
        self.prefetchers.push(Box::new(prefetcher));
        self
    }
}

impl Scriptlet for Prefetching {
    fn render(&self, ctx: &TestContext) -> Result<String> {
        self.delegate.render(ctx)
    }

    fn prefetchers(&self) -> Vec<&dyn Prefetcher> {
        let mut all: Vec<&dyn Prefetcher> = self.prefetchers.iter().map(|p| &**p).collect();
        all.extend(self.delegate.prefetchers());
        all
    }
}

/// Loads the named fragments, in order, separated by a blank line.
pub fn load<I, S>(names: I) -> LoadFile
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    LoadFile {
        names: names.into_iter().map(Into::into).collect(),
    }
}

/// Emits the given lines verbatim.
pub fn instructions<I, S>(lines: I) -> Instructions
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Instructions {
        lines: lines.into_iter().map(Into::into).collect(),
    }
}

/// Emits one `export KEY="VALUE"` line per pair, in the order given.
///
/// Values are placed in double quotes and are subject to shell expansion.
pub fn envs<I, K, V>(pairs: I) -> Instructions
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    instructions(
        pairs
            .into_iter()
            .map(|(k, v)| format!("export {}=\"{}\"", k.as_ref(), v.as_ref())),
    )
}

/// Concatenates scriptlets, in order.
pub fn union(parts: Vec<Box<dyn Scriptlet>>) -> Union {
    Union { parts }
}
