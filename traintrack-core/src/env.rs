//! Environment variable expansion for raw config text.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{([^}]+)\}|([A-Za-z0-9_]+))").expect("env var pattern is valid")
});

/// Expand `$VAR` and `${VAR}` references in `text`.
///
/// References to variables that are not set are left unchanged.
pub fn expand_env_vars(text: &str) -> String {
    expand_with(text, |name| std::env::var(name).ok())
}

/// Expand references using `lookup` instead of the process environment.
pub fn expand_with<F>(text: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    ENV_VAR
        .replace_all(text, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            lookup(name).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
