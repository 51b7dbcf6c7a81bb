//! Registry of model and callback classes available to the trainer.
//!
//! Populated once by scanning the model library: every top-level `class Name` in
//! `<model_library>/<group>/Models/*.py` is registered as `(group, Name)`. When two
//! modules export the same name, the module that sorts first wins.

use crate::error::{Result, TrainTrackError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static CLASS_DEF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^class\s+([A-Za-z_][A-Za-z0-9_]*)").expect("class pattern is valid")
});

/// Directory inside each group that holds model and callback modules.
pub const MODELS_DIR: &str = "Models";

/// A model or callback class the trainer can construct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub group: String,
    pub name: String,
    /// Module file defining the class.
    pub module: PathBuf,
}

/// Lookup table from `(group, name)` to model entries.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    entries: BTreeMap<(String, String), ModelEntry>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan a model library directory.
    pub fn discover(model_library: &Path) -> Result<Self> {
        let mut registry = Self::new();
        for group_dir in sorted_entries(model_library)? {
            let models_dir = group_dir.join(MODELS_DIR);
            if !models_dir.is_dir() {
                continue;
            }
            let group = match group_dir.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => continue,
            };

            for module in sorted_entries(&models_dir)? {
                if module.extension().and_then(|e| e.to_str()) != Some("py") {
                    continue;
                }
                let source = std::fs::read_to_string(&module)
                    .map_err(|e| TrainTrackError::io(format!("reading {}", module.display()), e))?;
                for class in exported_classes(&source) {
                    registry.register(ModelEntry {
                        group: group.clone(),
                        name: class,
                        module: module.clone(),
                    });
                }
            }
        }
        Ok(registry)
    }

    /// Add an entry. Returns `false` and keeps the existing entry if the name is taken.
    pub fn register(&mut self, entry: ModelEntry) -> bool {
        let key = (entry.group.clone(), entry.name.clone());
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, entry);
        true
    }

    pub fn lookup(&self, group: &str, name: &str) -> Result<&ModelEntry> {
        self.entries
            .get(&(group.to_string(), name.to_string()))
            .ok_or_else(|| TrainTrackError::ModelNotFound {
                group: group.to_string(),
                name: name.to_string(),
            })
    }

    /// Names registered for a group, sorted.
    pub fn names_in(&self, group: &str) -> Vec<&str> {
        self.entries
            .values()
            .filter(|e| e.group == group)
            .map(|e| e.name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = std::fs::read_dir(dir)
        .map_err(|e| TrainTrackError::io(format!("listing {}", dir.display()), e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect::<Vec<_>>();
    paths.sort();
    Ok(paths)
}

fn exported_classes(source: &str) -> Vec<String> {
    CLASS_DEF
        .captures_iter(source)
        .map(|cap| cap[1].to_string())
        .filter(|name| !name.starts_with('_'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn library() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let models = dir.path().join("gnn/Models");
        fs::create_dir_all(&models).unwrap();
        fs::write(
            models.join("interaction.py"),
            "import torch\n\nclass InteractionGNN(GNNBase):\n    pass\n\nclass _Helper:\n    pass\n",
        )
        .unwrap();
        fs::write(
            models.join("callbacks.py"),
            "class GNNTelemetry(Callback):\n    def on_epoch_end(self):\n        class Inner: pass\n",
        )
        .unwrap();
        fs::write(models.join("README.md"), "class NotPython").unwrap();
        fs::create_dir_all(dir.path().join("processing")).unwrap();
        dir
    }

    #[test]
    fn test_discover_registers_top_level_classes() {
        let lib = library();
        let registry = ModelRegistry::discover(lib.path()).unwrap();

        let entry = registry.lookup("gnn", "InteractionGNN").unwrap();
        assert_eq!(entry.module, lib.path().join("gnn/Models/interaction.py"));
        assert!(registry.lookup("gnn", "GNNTelemetry").is_ok());
        assert_eq!(registry.names_in("gnn"), vec!["GNNTelemetry", "InteractionGNN"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_lookup_miss_is_model_not_found() {
        let lib = library();
        let registry = ModelRegistry::discover(lib.path()).unwrap();

        for (group, name) in [("gnn", "_Helper"), ("gnn", "NotPython"), ("processing", "InteractionGNN")] {
            let err = registry.lookup(group, name).unwrap_err();
            assert!(matches!(err, TrainTrackError::ModelNotFound { .. }));
        }
    }

    #[test]
    fn test_first_registration_wins() {
        let mut registry = ModelRegistry::new();
        let first = ModelEntry {
            group: "g".into(),
            name: "M".into(),
            module: "a.py".into(),
        };
        let second = ModelEntry {
            module: "b.py".into(),
            ..first.clone()
        };
        assert!(registry.register(first.clone()));
        assert!(!registry.register(second));
        assert_eq!(registry.lookup("g", "M").unwrap(), &first);
    }

    #[test]
    fn test_discover_missing_library() {
        let err = ModelRegistry::discover(Path::new("/nonexistent/library")).unwrap_err();
        assert!(matches!(err, TrainTrackError::Io { .. }));
    }
}
