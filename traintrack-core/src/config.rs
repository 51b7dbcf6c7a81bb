//! Configuration types for TrainTrack.
//!
//! Uses `figment` for the project configuration: defaults -> YAML file -> environment
//! (`TRAINTRACK_SERIAL`, `TRAINTRACK_LIBRARIES__MODEL_LIBRARY`, ...). Pipeline files and
//! per-stage model configs are YAML mappings read with `serde_yaml` into an
//! order-preserving [`ConfigMap`].

use crate::env::expand_env_vars;
use crate::error::{Result, TrainTrackError};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};

/// Flat, insertion-ordered key/value configuration.
pub type ConfigMap = serde_json::Map<String, Value>;

/// Experiment logger selected for every stage of a project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Option<String>", into = "Option<String>")]
pub enum LoggerKind {
    Wandb,
    Tb,
    #[default]
    None,
}

impl TryFrom<Option<String>> for LoggerKind {
    type Error = String;

    fn try_from(value: Option<String>) -> std::result::Result<Self, Self::Error> {
        match value.as_deref() {
            None | Some("none") | Some("None") | Some("null") => Ok(LoggerKind::None),
            Some("wandb") => Ok(LoggerKind::Wandb),
            Some("tb") => Ok(LoggerKind::Tb),
            Some(other) => Err(format!(
                "unknown logger '{other}' (expected wandb, tb or none)"
            )),
        }
    }
}

impl From<LoggerKind> for Option<String> {
    fn from(kind: LoggerKind) -> Self {
        match kind {
            LoggerKind::Wandb => Some("wandb".into()),
            LoggerKind::Tb => Some("tb".into()),
            LoggerKind::None => None,
        }
    }
}

impl LoggerKind {
    /// Value written into a stage config under `logger`.
    pub fn to_value(self) -> Value {
        Option::<String>::from(self).map_or(Value::Null, Value::String)
    }
}

/// Library locations shared by all stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Libraries {
    /// Root of the model library; stage configs live under `<model_library>/<set_name>`.
    #[serde(default)]
    pub model_library: PathBuf,
    /// Root of run artifacts; resumable runs live under `<artifact_library>/.../<run_id>`.
    #[serde(default)]
    pub artifact_library: PathBuf,
}

/// Project-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub libraries: Libraries,
    #[serde(default)]
    pub logger: LoggerKind,
    /// Chain every batch submission on the one before it.
    #[serde(default)]
    pub serial: bool,
    /// Lines placed before the run-executor invocation in each batch script.
    #[serde(default)]
    pub custom_batch_setup: Vec<String>,
    /// Shell commands run before `sbatch` for stages with `batch_setup` set.
    #[serde(default)]
    pub command_line_setup: Vec<String>,
    /// Command a batch job runs to execute one run.
    #[serde(default = "default_batch_command")]
    pub batch_command: String,
    /// External trainer invoked for local runs.
    #[serde(default = "default_trainer_command")]
    pub trainer_command: Vec<String>,
    /// File the configuration was loaded from. Batch jobs reload it from here.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

fn default_batch_command() -> String {
    "traintrack batch-stage".to_string()
}

fn default_trainer_command() -> Vec<String> {
    vec!["python".to_string(), "-m".to_string(), "train".to_string()]
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            libraries: Libraries::default(),
            logger: LoggerKind::None,
            serial: false,
            custom_batch_setup: Vec::new(),
            command_line_setup: Vec::new(),
            batch_command: default_batch_command(),
            trainer_command: default_trainer_command(),
            source: None,
        }
    }
}

impl ProjectConfig {
    /// Load project configuration from a YAML file layered under `TRAINTRACK_` environment
    /// variables.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(TrainTrackError::ConfigNotFound {
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                search_root: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            });
        }

        let mut config: ProjectConfig = Figment::from(Serialized::defaults(ProjectConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("TRAINTRACK_").split("__"))
            .extract()
            .map_err(|e| TrainTrackError::parse(path, e))?;

        config.validate()?;
        config.source = Some(std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()));
        Ok(config)
    }

    /// Defaults layered under `TRAINTRACK_` environment variables, with no file.
    ///
    /// Batch jobs use this: their run config already carries the library paths, so
    /// the result is not validated.
    pub fn from_env() -> Result<Self> {
        Figment::from(Serialized::defaults(ProjectConfig::default()))
            .merge(Env::prefixed("TRAINTRACK_").split("__"))
            .extract()
            .map_err(|e| TrainTrackError::parse("environment", e))
    }

    /// Required-key presence check.
    pub fn validate(&self) -> Result<()> {
        if self.libraries.model_library.as_os_str().is_empty() {
            return Err(TrainTrackError::missing_key("libraries.model_library"));
        }
        if self.libraries.artifact_library.as_os_str().is_empty() {
            return Err(TrainTrackError::missing_key("libraries.artifact_library"));
        }
        Ok(())
    }

    /// The library paths as a merge layer.
    pub fn library_layer(&self) -> ConfigMap {
        let mut layer = ConfigMap::new();
        layer.insert(
            "model_library".into(),
            Value::String(self.libraries.model_library.display().to_string()),
        );
        layer.insert(
            "artifact_library".into(),
            Value::String(self.libraries.artifact_library.display().to_string()),
        );
        layer
    }
}

/// One entry of a pipeline's `stage_list`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageDescriptor {
    /// File name of the stage config, searched for under `<model_library>/<set_name>`.
    #[serde(alias = "config")]
    pub config_file_name: String,
    /// Model group the stage belongs to.
    #[serde(alias = "set")]
    pub set_name: String,
    #[serde(default, rename = "override", skip_serializing_if = "Option::is_none")]
    pub overrides: Option<ConfigMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_config: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_setup: Option<bool>,
    /// Any other descriptor keys (`name`, `project`, ...).
    #[serde(flatten)]
    pub extra: ConfigMap,
}

impl StageDescriptor {
    pub fn new(set_name: impl Into<String>, config_file_name: impl Into<String>) -> Self {
        Self {
            config_file_name: config_file_name.into(),
            set_name: set_name.into(),
            ..Self::default()
        }
    }

    /// The descriptor's own fields as a merge layer. Absent optional fields are omitted.
    pub fn as_layer(&self) -> ConfigMap {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => ConfigMap::new(),
        }
    }
}

impl fmt::Display for StageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.set_name, self.config_file_name)
    }
}

/// A pipeline definition: stages run strictly in list order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub stage_list: Vec<StageDescriptor>,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| TrainTrackError::io(format!("reading {}", path.display()), e))?;
        Self::parse(&text, path)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| TrainTrackError::parse(path, e))
    }
}

/// Invocation flags that influence resolution and dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunArgs {
    /// `Some` when the invocation set the inference flag explicitly.
    pub inference: Option<bool>,
    /// Submit runs to the batch scheduler instead of executing them locally.
    pub batch: bool,
}

/// Read a YAML key/value file, expanding environment variables in the raw text first.
pub fn load_yaml_mapping(path: &Path) -> Result<ConfigMap> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| TrainTrackError::io(format!("reading {}", path.display()), e))?;
    parse_yaml_mapping(&expand_env_vars(&raw), path)
}

/// Parse YAML text that must hold a mapping at the top level.
pub fn parse_yaml_mapping(text: &str, path: &Path) -> Result<ConfigMap> {
    match serde_yaml::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(TrainTrackError::parse(
            path,
            format!("expected a key/value mapping, found {}", kind_of(&other)),
        )),
        Err(e) => Err(TrainTrackError::parse(path, e)),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "an empty document",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}
