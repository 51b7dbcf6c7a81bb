//! Stage configuration resolution.
//!
//! A stage's config is built once per pipeline pass by folding four layers, each a
//! key-wise overwrite with no deep merge:
//!
//! 1. base config (stage config file, or the hyperparameters of a resumed checkpoint)
//! 2. the stage's `override` mapping
//! 3. project library paths
//! 4. the stage descriptor's own fields
//!
//! The inference flag policy is applied to the result.

use crate::checkpoint::{CheckpointLocator, CheckpointReader, HparamsReader};
use crate::config::{ConfigMap, ProjectConfig, RunArgs, StageDescriptor, load_yaml_mapping};
use crate::error::{Result, TrainTrackError};
use crate::search::{EntryKind, find_named};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A stage's fully merged configuration, before sweep expansion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedConfig(ConfigMap);

impl ResolvedConfig {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &ConfigMap {
        &self.0
    }

    pub fn into_map(self) -> ConfigMap {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<ConfigMap> for ResolvedConfig {
    fn from(map: ConfigMap) -> Self {
        Self(map)
    }
}

/// Fold layers in order; a later layer's value replaces an earlier one key by key.
///
/// Keys keep the position of their first appearance.
pub fn merge_layers<I>(layers: I) -> ConfigMap
where
    I: IntoIterator<Item = ConfigMap>,
{
    layers.into_iter().fold(ConfigMap::new(), |mut acc, layer| {
        for (key, value) in layer {
            acc.insert(key, value);
        }
        acc
    })
}

/// Force or keep the `inference` key according to the invocation flags.
///
/// `inference: true` always wins. An explicit `false` clears it only for local runs;
/// batch submissions keep whatever the config holds.
pub fn apply_inference_policy(config: &mut ConfigMap, run_args: &RunArgs) {
    match run_args.inference {
        Some(true) => {
            config.insert("inference".into(), Value::Bool(true));
        }
        Some(false) if !run_args.batch => {
            config.insert("inference".into(), Value::Bool(false));
        }
        _ => {}
    }
}

/// Find a stage config file named `name` below `root`.
pub fn find_config(name: &str, root: &Path) -> Result<PathBuf> {
    find_named(root, name, EntryKind::File).ok_or_else(|| TrainTrackError::ConfigNotFound {
        name: name.to_string(),
        search_root: root.to_path_buf(),
    })
}

/// Loads and merges stage configurations.
#[derive(Clone)]
pub struct ConfigResolver {
    locator: CheckpointLocator,
    reader: Arc<dyn CheckpointReader>,
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigResolver {
    pub fn new() -> Self {
        Self::with_reader(Arc::new(HparamsReader))
    }

    /// Use a custom checkpoint hyperparameter reader.
    pub fn with_reader(reader: Arc<dyn CheckpointReader>) -> Self {
        Self {
            locator: CheckpointLocator,
            reader,
        }
    }

    /// Resolve the configuration for one stage.
    pub fn resolve(
        &self,
        stage: &StageDescriptor,
        resume_id: Option<&str>,
        project: &ProjectConfig,
        run_args: &RunArgs,
    ) -> Result<ResolvedConfig> {
        let base = match resume_id {
            None => self.load_fresh(stage, project)?,
            Some(run_id) => self.load_resumed(run_id, project)?,
        };

        let mut merged = merge_layers([
            base,
            stage.overrides.clone().unwrap_or_default(),
            project.library_layer(),
            stage.as_layer(),
        ]);
        apply_inference_policy(&mut merged, run_args);

        Ok(ResolvedConfig(merged))
    }

    fn load_fresh(&self, stage: &StageDescriptor, project: &ProjectConfig) -> Result<ConfigMap> {
        let root = project.libraries.model_library.join(&stage.set_name);
        let path = find_config(&stage.config_file_name, &root)?;

        let mut config = load_yaml_mapping(&path)?;
        config.insert("logger".into(), project.logger.to_value());
        config.insert("resume_id".into(), Value::Null);
        Ok(config)
    }

    fn load_resumed(&self, run_id: &str, project: &ProjectConfig) -> Result<ConfigMap> {
        let checkpoint = self
            .locator
            .find(run_id, &project.libraries.artifact_library)?;

        let mut config = self.reader.read_hyper_parameters(&checkpoint)?;
        config.insert(
            "checkpoint_path".into(),
            Value::String(checkpoint.display().to_string()),
        );
        Ok(config)
    }
}
