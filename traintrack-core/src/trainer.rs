//! Local execution of a single run.
//!
//! [`TrainingJob::prepare`] turns a flat run config into what a trainer needs:
//! the model class, its callbacks, the experiment logger and the trainer
//! settings. A [`StageExecutor`] then runs the job. The stock executor,
//! [`ProcessExecutor`], hands the run's `--key value` tokens to an external
//! trainer process.

use crate::args::to_arg_tokens;
use crate::config::{LoggerKind, ProjectConfig};
use crate::error::{Result, TrainTrackError};
use crate::registry::{ModelEntry, ModelRegistry};
use crate::sweep::RunConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Project name used by the experiment logger when the run config has none.
pub const DEFAULT_PROJECT: &str = "my_project";

/// Experiment logger construction parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LoggerSpec {
    Wandb {
        project: String,
        save_dir: PathBuf,
        id: Option<String>,
    },
    Tb {
        name: String,
        save_dir: PathBuf,
        version: Option<String>,
    },
    None,
}

impl LoggerSpec {
    pub fn from_run(run: &RunConfig) -> Result<Self> {
        let kind = match run.get("logger") {
            None | Some(Value::Null) => LoggerKind::None,
            Some(Value::String(s)) => {
                LoggerKind::try_from(Some(s.clone())).map_err(|e| TrainTrackError::invalid("logger", e))?
            }
            Some(other) => {
                return Err(TrainTrackError::invalid(
                    "logger",
                    format!("expected a string, found {other}"),
                ));
            }
        };
        if kind == LoggerKind::None {
            return Ok(LoggerSpec::None);
        }

        let project = run
            .get_text("project")
            .map_or_else(|| DEFAULT_PROJECT.to_string(), |p| p.into_owned());
        let save_dir = run
            .get_str("artifact_library")
            .map(PathBuf::from)
            .ok_or_else(|| TrainTrackError::missing_key("artifact_library"))?;
        let resume_id = run.resume_id().map(|id| id.into_owned());

        Ok(match kind {
            LoggerKind::Wandb => LoggerSpec::Wandb {
                project,
                save_dir,
                id: resume_id,
            },
            LoggerKind::Tb => LoggerSpec::Tb {
                name: project,
                save_dir,
                version: resume_id,
            },
            LoggerKind::None => LoggerSpec::None,
        })
    }
}

/// Trainer options read from a run config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerSettings {
    pub max_epochs: u64,
    /// Metric the checkpoint callback monitors.
    pub fom: String,
    /// `min` or `max`.
    pub fom_mode: String,
    pub sanity_steps: u64,
    /// Checkpoint to resume from.
    pub checkpoint_path: Option<PathBuf>,
}

impl TrainerSettings {
    pub fn from_run(run: &RunConfig) -> Result<Self> {
        let max_epochs = match run.get("max_epochs") {
            None | Some(Value::Null) => return Err(TrainTrackError::missing_key("max_epochs")),
            Some(value) => as_count("max_epochs", value)?,
        };
        let sanity_steps = match run.get("sanity_steps") {
            None | Some(Value::Null) => 2,
            Some(value) => as_count("sanity_steps", value)?,
        };
        let fom_mode = run.get_str("fom_mode").unwrap_or("min").to_string();
        if fom_mode != "min" && fom_mode != "max" {
            return Err(TrainTrackError::invalid(
                "fom_mode",
                format!("expected min or max, found '{fom_mode}'"),
            ));
        }

        Ok(Self {
            max_epochs,
            fom: run.get_str("fom").unwrap_or("val_loss").to_string(),
            fom_mode,
            sanity_steps,
            checkpoint_path: run.get_str("checkpoint_path").map(PathBuf::from),
        })
    }
}

fn as_count(key: &str, value: &Value) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| TrainTrackError::invalid(key, format!("expected a non-negative integer, found {value}")))
}

/// Normalize a config entry to a list: absent or null is empty, a scalar becomes one element.
pub fn normalize_list(value: Option<&Value>) -> Vec<Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(other) => vec![other.clone()],
    }
}

/// Everything needed to train one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingJob {
    pub model: ModelEntry,
    pub callbacks: Vec<ModelEntry>,
    pub logger: LoggerSpec,
    pub trainer: TrainerSettings,
    pub inference: bool,
    pub config: RunConfig,
}

impl TrainingJob {
    /// Look up the run's model and callbacks and read its trainer options.
    pub fn prepare(run: &RunConfig, registry: &ModelRegistry) -> Result<Self> {
        let group = run
            .set_name()
            .ok_or_else(|| TrainTrackError::missing_key("set_name"))?;
        let name = run
            .get_text("name")
            .ok_or_else(|| TrainTrackError::missing_key("name"))?;
        let model = registry.lookup(&group, &name)?.clone();

        let mut callbacks = Vec::new();
        for callback in normalize_list(run.get("callbacks")) {
            let callback = callback
                .as_str()
                .ok_or_else(|| TrainTrackError::invalid("callbacks", format!("expected a class name, found {callback}")))?;
            callbacks.push(registry.lookup(&group, callback)?.clone());
        }

        Ok(Self {
            model,
            callbacks,
            logger: LoggerSpec::from_run(run)?,
            trainer: TrainerSettings::from_run(run)?,
            inference: run.get("inference").and_then(Value::as_bool).unwrap_or(false),
            config: run.clone(),
        })
    }
}

/// Result of executing one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Failure detail, empty on success.
    pub detail: String,
}

impl RunOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            detail: String::new(),
        }
    }

    pub fn failed(exit_code: Option<i32>, detail: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code,
            detail: detail.into(),
        }
    }
}

/// Runs prepared training jobs in the foreground.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(&self, job: &TrainingJob) -> Result<RunOutcome>;
}

/// Number of trailing stderr lines kept in a failed outcome.
const STDERR_TAIL_LINES: usize = 20;

/// Executes jobs by spawning an external trainer with the run's arg tokens.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    command: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl ProcessExecutor {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            working_dir: None,
        }
    }

    pub fn from_project(project: &ProjectConfig) -> Self {
        Self::new(project.trainer_command.clone())
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl StageExecutor for ProcessExecutor {
    async fn execute(&self, job: &TrainingJob) -> Result<RunOutcome> {
        let (program, base_args) = self
            .command
            .split_first()
            .ok_or_else(|| TrainTrackError::missing_key("trainer_command"))?;
        let tokens = to_arg_tokens(job.config.as_map());
        debug!(program = %program, model = %job.model.name, args = tokens.len(), "Spawning trainer");

        let mut cmd = Command::new(program);
        cmd.args(base_args)
            .args(&tokens)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| TrainTrackError::io(format!("spawning trainer '{program}'"), e))?;

        if output.status.success() {
            return Ok(RunOutcome::succeeded());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines: Vec<&str> = stderr.lines().collect();
        let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
        Ok(RunOutcome::failed(output.status.code(), tail))
    }
}
