//! Variable interpolation for configuration values.

use std::collections::HashMap;

/// Interpolate environment variables in a string.
///
/// Supports `${VAR}` and `${VAR:-default}`. Returns an error message if a
/// referenced variable is not set and has no default.
///
/// # Examples
///
/// ```
/// assert_eq!(shellharness::env::interpolate_env("${SHELLHARNESS_DOC_UNSET:-x}").unwrap(), "x");
/// assert_eq!(shellharness::env::interpolate_env("plain").unwrap(), "plain");
/// ```
pub fn interpolate_env(s: &str) -> Result<String, String> {
    interpolate_env_with(s, &HashMap::new())
}

/// Interpolate variables in a string, with additional variables from a map.
///
/// The map is consulted first, then the process environment. A `$` not
/// followed by `{` is kept verbatim, so `$PATH` passes through untouched.
pub fn interpolate_env_with(s: &str, vars: &HashMap<String, String>) -> Result<String, String> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut reference = String::new();
            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(c) => reference.push(c),
                    None => {
                        return Err(format!("Unclosed variable reference: ${{{reference}"));
                    }
                }
            }
            let (name, default) = match reference.split_once(":-") {
                Some((name, default)) => (name, Some(default)),
                None => (reference.as_str(), None),
            };
            // First check provided map, then system env
            let found = vars
                .get(name)
                .cloned()
                .or_else(|| std::env::var(name).ok());
            let value = match (found, default) {
                (Some(v), Some(d)) if v.is_empty() => d.to_string(),
                (Some(v), _) => v,
                (None, Some(d)) => d.to_string(),
                (None, None) => return Err(format!("Environment variable '{name}' is not set")),
            };
            result.push_str(&value);
        } else {
            result.push(c);
        }
    }

    Ok(result)
}
