//! Sweep expansion of resolved stage configs into concrete runs.
//!
//! Every key is an axis: list values are used as-is, anything else is a
//! single-value axis. The product iterates keys in insertion order with the
//! last key varying fastest, so `{"a": [1, 2], "b": [3, 4]}` yields
//! `(1,3) (1,4) (2,3) (2,4)`. An empty list collapses the product to no runs.

use crate::args::value_token;
use crate::config::ConfigMap;
use crate::resolver::ResolvedConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::path::PathBuf;

/// One concrete parameter combination of a stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunConfig(ConfigMap);

impl RunConfig {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn as_map(&self) -> &ConfigMap {
        &self.0
    }

    pub fn into_map(self) -> ConfigMap {
        self.0
    }

    /// A name or id value as text.
    ///
    /// Numbers and booleans are rendered as their token, since an id such as
    /// `20240117` comes back from the command line as a number.
    pub fn get_text(&self, key: &str) -> Option<Cow<'_, str>> {
        match self.0.get(key)? {
            Value::String(s) => Some(Cow::Borrowed(s.as_str())),
            value @ (Value::Number(_) | Value::Bool(_)) => Some(Cow::Owned(value_token(value))),
            _ => None,
        }
    }

    pub fn set_name(&self) -> Option<Cow<'_, str>> {
        self.get_text("set_name")
    }

    pub fn resume_id(&self) -> Option<Cow<'_, str>> {
        self.get_text("resume_id")
    }

    pub fn batch_config(&self) -> Option<PathBuf> {
        self.get_str("batch_config").map(PathBuf::from)
    }

    /// Whether the run asks for the project's command-line setup before submission.
    pub fn batch_setup(&self) -> bool {
        self.get("batch_setup").is_some_and(is_truthy)
    }
}

impl From<ConfigMap> for RunConfig {
    fn from(map: ConfigMap) -> Self {
        Self(map)
    }
}

/// Truthiness of a config value: null, false, zero, and empty strings/lists/maps are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Expands resolved configurations into their cartesian product of runs.
#[derive(Debug, Clone, Default)]
pub struct SweepExpander;

impl SweepExpander {
    pub fn expand(&self, resolved: &ResolvedConfig) -> Vec<RunConfig> {
        expand_map(resolved.as_map())
    }
}

/// The cartesian product of every key's axis, in key order.
pub fn expand_map(config: &ConfigMap) -> Vec<RunConfig> {
    let mut runs = vec![ConfigMap::new()];
    for (key, value) in config {
        let axis: &[Value] = match value {
            Value::Array(values) => values.as_slice(),
            scalar => std::slice::from_ref(scalar),
        };

        let mut next = Vec::with_capacity(runs.len() * axis.len());
        for run in &runs {
            for choice in axis {
                let mut run = run.clone();
                run.insert(key.clone(), choice.clone());
                next.push(run);
            }
        }
        runs = next;
    }
    runs.into_iter().map(RunConfig).collect()
}
