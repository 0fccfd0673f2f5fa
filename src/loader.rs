//! Table file loader.
//!
//! Loads and parses test tables and the harness configuration from disk.

use crate::config::HarnessConfig;
use crate::schema::TableSpec;
use std::path::{Path, PathBuf};

/// Error type for table and config loading.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// Failed to read the file.
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse YAML.
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// Failed to parse TOML.
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    /// Unsupported file extension.
    #[error("unsupported file format: {0} (expected .yaml, .yml, or .toml)")]
    UnsupportedFormat(String),
    /// A `${VAR}` reference could not be resolved.
    #[error("invalid config: {0}")]
    Interpolation(String),
}

/// The name of the harness configuration file.
pub const CONFIG_FILENAME: &str = "shellharness.yaml";

/// Load a test table from a file path.
pub fn load_table(path: &Path) -> Result<TableSpec, LoadError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let contents = std::fs::read_to_string(path)?;

    match ext {
        "yaml" | "yml" => Ok(serde_yaml::from_str(&contents)?),
        "toml" => Ok(toml::from_str(&contents)?),
        other => Err(LoadError::UnsupportedFormat(other.to_string())),
    }
}

/// Load the harness configuration from a directory.
///
/// Looks for `shellharness.yaml` in the given directory and resolves its
/// paths against that directory. Returns `None` if the file doesn't exist,
/// `Err` if it exists but is invalid.
pub fn load_config(dir: &Path) -> Result<Option<HarnessConfig>, LoadError> {
    let config_path = dir.join(CONFIG_FILENAME);

    if !config_path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&config_path)?;
    let config: HarnessConfig = serde_yaml::from_str(&contents)?;
    let base = std::path::absolute(dir)?;
    config
        .resolve(&base)
        .map(Some)
        .map_err(LoadError::Interpolation)
}

/// Find all table files in a directory or return the single file.
pub fn find_tables(path: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut tables = Vec::new();
    collect_tables_recursive(path, &mut tables)?;
    tables.sort();
    Ok(tables)
}

fn collect_tables_recursive(dir: &Path, tables: &mut Vec<PathBuf>) -> Result<(), std::io::Error> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            collect_tables_recursive(&path, tables)?;
        } else if let Some(ext) = path.extension().and_then(|e| e.to_str())
            && (ext == "yaml" || ext == "yml" || ext == "toml")
        {
            // Skip harness config file
            if path.file_name().is_some_and(|f| f == CONFIG_FILENAME) {
                continue;
            }
            tables.push(path);
        }
    }
    Ok(())
}
