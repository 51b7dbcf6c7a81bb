//! Command-line token encoding of run configs.
//!
//! This is the contract between the orchestrator and the process that executes
//! a submitted run: each key becomes `--key` followed by its value, and a list
//! value is flattened into one token per element after the single flag
//! (`--hidden 32 64`). [`parse_args`] reads the same stream back.

use crate::config::ConfigMap;
use serde_json::{Number, Value};

/// Serialize a config into `--key value...` tokens, in key order.
pub fn to_arg_tokens(config: &ConfigMap) -> Vec<String> {
    let mut tokens = Vec::with_capacity(config.len() * 2);
    for (key, value) in config {
        tokens.push(format!("--{key}"));
        match value {
            Value::Array(items) => tokens.extend(items.iter().map(value_token)),
            scalar => tokens.push(value_token(scalar)),
        }
    }
    tokens
}

/// The serialized tokens joined by single spaces.
pub fn to_arg_string(config: &ConfigMap) -> String {
    to_arg_tokens(config).join(" ")
}

/// Render one value as a token. Mappings and nested lists become compact JSON.
pub fn value_token(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Parse `--key value...` tokens back into a config.
///
/// One value gives a scalar, several give a list, and a bare flag gives `true`.
/// Tokens before the first flag are ignored.
pub fn parse_args<I, S>(tokens: I) -> ConfigMap
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut config = ConfigMap::new();
    let mut current: Option<(String, Vec<Value>)> = None;

    for token in tokens {
        let token = token.as_ref();
        match token.strip_prefix("--").filter(|key| !key.is_empty()) {
            Some(key) => {
                if let Some((key, values)) = current.take() {
                    config.insert(key, collect_values(values));
                }
                current = Some((key.to_string(), Vec::new()));
            }
            None => {
                if let Some((_, values)) = current.as_mut() {
                    values.push(estimate_type(token));
                }
            }
        }
    }
    if let Some((key, values)) = current {
        config.insert(key, collect_values(values));
    }
    config
}

fn collect_values(mut values: Vec<Value>) -> Value {
    match values.len() {
        0 => Value::Bool(true),
        1 => values.remove(0),
        _ => Value::Array(values),
    }
}

/// Guess the type of a command-line token.
///
/// Tried in order: null, boolean, integer, float, JSON mapping/list, then string.
pub fn estimate_type(token: &str) -> Value {
    match token {
        "None" | "none" | "null" => return Value::Null,
        "True" | "true" => return Value::Bool(true),
        "False" | "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = token.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Some(n) = token.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    if token.starts_with('{') || token.starts_with('[') {
        if let Ok(parsed) = serde_json::from_str::<Value>(token) {
            return parsed;
        }
    }
    Value::String(token.to_string())
}

/// Quote a token for a POSIX shell if it contains anything beyond a safe set.
pub fn shell_quote(token: &str) -> String {
    let safe = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=+,@%".contains(c));
    if safe {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', r"'\''"))
    }
}
