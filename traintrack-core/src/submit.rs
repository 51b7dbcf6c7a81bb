//! Batch job submission with dependency chaining.
//!
//! [`JobSubmitter`] turns a run config into a [`SubmissionRequest`] (resources from the
//! run's batch config file, the executor command line, an optional `afterok`
//! dependency, optional setup commands) and hands it to a [`SchedulerClient`].
//! [`SlurmClient`] is the scheduler client for Slurm's `sbatch`.

use crate::args::{shell_quote, to_arg_tokens, value_token};
use crate::config::{ConfigMap, ProjectConfig, parse_yaml_mapping};
use crate::error::{Result, TrainTrackError};
use crate::sweep::RunConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Scheduler-assigned job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordering constraint on a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    /// Start only after the given job completed successfully.
    AfterOk(JobHandle),
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::AfterOk(handle) => write!(f, "afterok:{handle}"),
        }
    }
}

/// Everything a scheduler client needs to submit one run.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionRequest {
    /// Scheduler resource requests, in batch-config file order.
    pub resources: ConfigMap,
    /// Job body: batch setup lines followed by the run-executor invocation.
    pub command: String,
    pub dependency: Option<Dependency>,
    /// Commands run in the submitting shell before the scheduler's submit command.
    pub setup_commands: Vec<String>,
}

/// Client of an external batch scheduler.
#[async_trait]
pub trait SchedulerClient: Send + Sync {
    async fn submit(&self, request: &SubmissionRequest) -> Result<JobHandle>;
}

/// Serializes runs and submits them through a scheduler client.
#[derive(Clone)]
pub struct JobSubmitter {
    scheduler: Arc<dyn SchedulerClient>,
}

impl JobSubmitter {
    pub fn new(scheduler: Arc<dyn SchedulerClient>) -> Self {
        Self { scheduler }
    }

    /// Submit one run, depending on `previous` when the project is serial.
    ///
    /// There is no retry: a rejected submission is returned as `JobSubmission`.
    pub async fn submit(
        &self,
        run: &RunConfig,
        project: &ProjectConfig,
        previous: Option<&JobHandle>,
    ) -> Result<JobHandle> {
        let request = self.prepare(run, project, previous)?;
        self.scheduler.submit(&request).await
    }

    /// Build the submission request for a run without submitting it.
    pub fn prepare(
        &self,
        run: &RunConfig,
        project: &ProjectConfig,
        previous: Option<&JobHandle>,
    ) -> Result<SubmissionRequest> {
        let resources = load_batch_config(run)?;

        // The job reloads the same project file so it runs the same trainer command.
        let project_flag = project.source.iter().flat_map(|path| {
            [
                "--project-config".to_string(),
                shell_quote(&path.display().to_string()),
            ]
        });
        let invocation = std::iter::once(project.batch_command.clone())
            .chain(project_flag)
            .chain(to_arg_tokens(run.as_map()).iter().map(|t| shell_quote(t)))
            .collect::<Vec<_>>()
            .join(" ");
        let command = project
            .custom_batch_setup
            .iter()
            .cloned()
            .chain(std::iter::once(invocation))
            .collect::<Vec<_>>()
            .join("\n");

        let dependency = previous
            .filter(|_| project.serial)
            .map(|handle| Dependency::AfterOk(handle.clone()));

        let setup_commands = if run.batch_setup() && !project.command_line_setup.is_empty() {
            project.command_line_setup.clone()
        } else {
            Vec::new()
        };

        Ok(SubmissionRequest {
            resources,
            command,
            dependency,
            setup_commands,
        })
    }
}

fn load_batch_config(run: &RunConfig) -> Result<ConfigMap> {
    let path = run
        .batch_config()
        .ok_or_else(|| TrainTrackError::missing_key("batch_config"))?;
    let text = std::fs::read_to_string(&path)
        .map_err(|e| TrainTrackError::io(format!("reading batch config {}", path.display()), e))?;
    parse_yaml_mapping(&text, &path)
}

/// Submits jobs with Slurm's `sbatch`, feeding the job script on stdin.
#[derive(Debug, Clone)]
pub struct SlurmClient {
    shell: PathBuf,
    submit_command: String,
}

impl Default for SlurmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SlurmClient {
    pub fn new() -> Self {
        Self {
            shell: PathBuf::from("/bin/bash"),
            submit_command: "sbatch".to_string(),
        }
    }

    /// Replace the submit command (for wrappers around `sbatch`).
    pub fn with_submit_command(mut self, command: impl Into<String>) -> Self {
        self.submit_command = command.into();
        self
    }

    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Render the job script for a request.
    pub fn render_script(&self, request: &SubmissionRequest) -> String {
        let mut lines = vec![format!("#!{}", self.shell.display())];
        for (key, value) in &request.resources {
            let flag = key.replace('_', "-");
            match value {
                Value::Bool(true) => lines.push(format!("#SBATCH --{flag}")),
                Value::Bool(false) | Value::Null => {}
                other => lines.push(format!("#SBATCH --{flag}={}", value_token(other))),
            }
        }
        if let Some(dependency) = &request.dependency {
            lines.push(format!("#SBATCH --dependency={dependency}"));
        }
        lines.push(String::new());
        lines.push(request.command.clone());
        lines.push(String::new());
        lines.join("\n")
    }

    /// The shell command line that performs the submission.
    pub fn submit_invocation(&self, request: &SubmissionRequest) -> String {
        request
            .setup_commands
            .iter()
            .chain(std::iter::once(&self.submit_command))
            .cloned()
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Extract the job id from `sbatch` output (`Submitted batch job <id>` or `--parsable` form).
pub fn parse_job_id(stdout: &str) -> Option<JobHandle> {
    stdout.lines().rev().find_map(|line| {
        let line = line.trim();
        let id = match line.strip_prefix("Submitted batch job ") {
            Some(rest) => rest.split_whitespace().next()?,
            None => line.split(';').next()?,
        };
        (!id.is_empty() && id.chars().all(|c| c.is_ascii_digit())).then(|| JobHandle::new(id))
    })
}

#[async_trait]
impl SchedulerClient for SlurmClient {
    async fn submit(&self, request: &SubmissionRequest) -> Result<JobHandle> {
        let script = self.render_script(request);
        let invocation = self.submit_invocation(request);

        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&invocation)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TrainTrackError::submission(format!("failed to run '{invocation}': {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A submit command that exits early closes the pipe; its exit status says why.
            match stdin.write_all(script.as_bytes()).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => {
                    return Err(TrainTrackError::submission(format!(
                        "failed to send job script: {e}"
                    )));
                }
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| TrainTrackError::submission(format!("'{invocation}' did not finish: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TrainTrackError::submission(format!(
                "'{invocation}' exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        parse_job_id(&stdout).ok_or_else(|| {
            TrainTrackError::submission(format!("no job id in scheduler output: {}", stdout.trim()))
        })
    }
}
