//! Per-test rendering context.

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// State a scriptlet renders against.
///
/// Every test owns one context. The scratch directory (exported to the script
/// as `TMPPATH`) holds the generated mock binaries and is put first on the
/// script's `PATH`, so concurrently running tests never see each other's mocks.
/// Both directories are removed when the context is dropped.
#[derive(Debug)]
pub struct TestContext {
    name: String,
    config: Arc<HarnessConfig>,
    scratch: TempDir,
}

impl TestContext {
    pub(crate) const BIN_DIR: &'static str = "bin";
    pub(crate) const ARTIFACTS_DIR: &'static str = "artifacts";

    /// Creates a fresh context with its own scratch and artifacts directories.
    pub fn new(name: impl Into<String>, config: Arc<HarnessConfig>) -> Result<Self> {
        let scratch = tempfile::Builder::new()
            .prefix("shellharness-")
            .tempdir()
            .map_err(HarnessError::Scratch)?;
        for dir in [Self::BIN_DIR, Self::ARTIFACTS_DIR] {
            std::fs::create_dir(scratch.path().join(dir)).map_err(HarnessError::Scratch)?;
        }
        Ok(Self {
            name: name.into(),
            config,
            scratch,
        })
    }

    /// The test name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// The private directory mocks are written to (`TMPPATH`).
    pub fn tmp_path(&self) -> std::path::PathBuf {
        self.scratch.path().join(Self::BIN_DIR)
    }

    /// The private artifacts directory.
    pub fn artifacts(&self) -> std::path::PathBuf {
        self.scratch.path().join(Self::ARTIFACTS_DIR)
    }

    /// Root of the scratch tree.
    pub fn scratch(&self) -> &Path {
        self.scratch.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contexts_are_isolated() {
        let config = Arc::new(HarnessConfig::default());
        let a = TestContext::new("a", config.clone()).unwrap();
        let b = TestContext::new("b", config).unwrap();
        assert_ne!(a.tmp_path(), b.tmp_path());
        assert!(a.tmp_path().is_dir());
        assert!(a.artifacts().is_dir());
        assert_eq!(a.name(), "a");
    }

    #[test]
    fn scratch_removed_on_drop() {
        let ctx = TestContext::new("gone", Arc::new(HarnessConfig::default())).unwrap();
        let scratch = ctx.scratch().to_path_buf();
        drop(ctx);
        assert!(!scratch.exists());
    }
}
