//! Sequential pipeline execution.
//!
//! Stages run strictly in list order. Each stage is resolved, expanded into runs,
//! and its runs are either submitted to the batch scheduler or executed locally
//! one after another. The first failing stage aborts the pipeline.

use crate::config::{ProjectConfig, RunArgs, StageDescriptor};
use crate::error::{Result, TrainTrackError};
use crate::observe::{PipelineObserver, TracingObserver};
use crate::registry::ModelRegistry;
use crate::resolver::ConfigResolver;
use crate::submit::{JobHandle, JobSubmitter};
use crate::sweep::{RunConfig, SweepExpander};
use crate::trainer::{ProcessExecutor, RunOutcome, StageExecutor, TrainingJob};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Progress of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Resolved,
    Expanded,
    Submitted,
    Executed,
    Done,
}

impl StageStatus {
    /// Whether `next` directly follows `self`.
    ///
    /// A stage whose sweep produced no runs goes from `Expanded` straight to `Done`.
    pub fn can_advance_to(self, next: StageStatus) -> bool {
        use StageStatus::*;
        matches!(
            (self, next),
            (Pending, Resolved)
                | (Resolved, Expanded)
                | (Expanded, Submitted)
                | (Expanded, Executed)
                | (Expanded, Done)
                | (Submitted, Done)
                | (Executed, Done)
        )
    }

    /// Move to `next`, rejecting backward or skipping transitions.
    pub fn advance(&mut self, next: StageStatus) -> Result<()> {
        if !self.can_advance_to(next) {
            return Err(TrainTrackError::invalid(
                "stage_status",
                format!("cannot move from {self} to {next}"),
            ));
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Pending => write!(f, "pending"),
            StageStatus::Resolved => write!(f, "resolved"),
            StageStatus::Expanded => write!(f, "expanded"),
            StageStatus::Submitted => write!(f, "submitted"),
            StageStatus::Executed => write!(f, "executed"),
            StageStatus::Done => write!(f, "done"),
        }
    }
}

/// What happened to one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub index: usize,
    pub set_name: String,
    pub config_file_name: String,
    pub status: StageStatus,
    /// Number of runs the sweep produced.
    pub runs: usize,
    /// Batch jobs in submission order.
    pub job_handles: Vec<JobHandle>,
    /// Local run results in execution order.
    pub outcomes: Vec<RunOutcome>,
}

impl StageRecord {
    fn new(index: usize, stage: &StageDescriptor) -> Self {
        Self {
            index,
            set_name: stage.set_name.clone(),
            config_file_name: stage.config_file_name.clone(),
            status: StageStatus::Pending,
            runs: 0,
            job_handles: Vec::new(),
            outcomes: Vec::new(),
        }
    }
}

/// Summary of a completed pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stages: Vec<StageRecord>,
}

impl PipelineReport {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            stages: Vec::new(),
        }
    }

    /// Every batch job handle across all stages, in submission order.
    pub fn job_handles(&self) -> Vec<&JobHandle> {
        self.stages.iter().flat_map(|s| s.job_handles.iter()).collect()
    }

    pub fn total_runs(&self) -> usize {
        self.stages.iter().map(|s| s.runs).sum()
    }
}

/// Drives a pipeline's stages through resolution, expansion and dispatch.
pub struct PipelineOrchestrator {
    resolver: ConfigResolver,
    expander: SweepExpander,
    submitter: Option<JobSubmitter>,
    executor: Option<Arc<dyn StageExecutor>>,
    registry: Option<Arc<ModelRegistry>>,
    observer: Arc<dyn PipelineObserver>,
}

impl Default for PipelineOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineOrchestrator {
    pub fn new() -> Self {
        Self {
            resolver: ConfigResolver::new(),
            expander: SweepExpander,
            submitter: None,
            executor: None,
            registry: None,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_resolver(mut self, resolver: ConfigResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Scheduler used in batch mode. Required for batch runs.
    pub fn with_submitter(mut self, submitter: JobSubmitter) -> Self {
        self.submitter = Some(submitter);
        self
    }

    /// Executor used in local mode. Defaults to the project's trainer command.
    pub fn with_executor(mut self, executor: Arc<dyn StageExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Model registry used in local mode. Defaults to scanning the project's model library.
    pub fn with_registry(mut self, registry: ModelRegistry) -> Self {
        self.registry = Some(Arc::new(registry));
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Run every stage in order.
    ///
    /// Errors are wrapped with the failing stage's index and name; no later stage
    /// is resolved, submitted or executed.
    pub async fn run(
        &self,
        stages: &[StageDescriptor],
        project: &ProjectConfig,
        run_args: &RunArgs,
    ) -> Result<PipelineReport> {
        let mut report = PipelineReport::new();
        let dispatch = self.dispatch(project, run_args)?;
        let mut previous: Option<JobHandle> = None;

        for (index, stage) in stages.iter().enumerate() {
            self.observer.on_stage_start(index, stage);
            let mut record = StageRecord::new(index, stage);

            if let Err(err) = self
                .run_stage(index, stage, project, run_args, &dispatch, &mut record, &mut previous)
                .await
            {
                self.observer.on_stage_failed(index, &err);
                return Err(err.in_stage(index, stage.to_string()));
            }

            self.observer.on_stage_done(index);
            report.stages.push(record);
        }

        report.finished_at = Some(Utc::now());
        Ok(report)
    }

    fn dispatch(&self, project: &ProjectConfig, run_args: &RunArgs) -> Result<Dispatch<'_>> {
        if run_args.batch {
            let submitter = self
                .submitter
                .as_ref()
                .ok_or_else(|| TrainTrackError::submission("no batch scheduler configured"))?;
            return Ok(Dispatch::Batch(submitter));
        }

        let registry = match &self.registry {
            Some(registry) => Arc::clone(registry),
            None => Arc::new(ModelRegistry::discover(&project.libraries.model_library)?),
        };
        let executor = match &self.executor {
            Some(executor) => Arc::clone(executor),
            None => Arc::new(ProcessExecutor::from_project(project)),
        };
        Ok(Dispatch::Local { registry, executor })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_stage(
        &self,
        index: usize,
        stage: &StageDescriptor,
        project: &ProjectConfig,
        run_args: &RunArgs,
        dispatch: &Dispatch<'_>,
        record: &mut StageRecord,
        previous: &mut Option<JobHandle>,
    ) -> Result<()> {
        let resolved = self
            .resolver
            .resolve(stage, stage.resume_id.as_deref(), project, run_args)?;
        record.status.advance(StageStatus::Resolved)?;
        self.observer
            .on_stage_resolved(index, resolved.len(), stage.resume_id.is_some());

        let runs = self.expander.expand(&resolved);
        record.runs = runs.len();
        record.status.advance(StageStatus::Expanded)?;
        self.observer.on_stage_expanded(index, runs.len());

        if !runs.is_empty() {
            match dispatch {
                Dispatch::Batch(submitter) => {
                    self.submit_runs(index, &runs, project, submitter, record, previous)
                        .await?;
                    record.status.advance(StageStatus::Submitted)?;
                }
                Dispatch::Local { registry, executor } => {
                    self.execute_runs(index, &runs, registry, executor.as_ref(), record)
                        .await?;
                    record.status.advance(StageStatus::Executed)?;
                }
            }
        }

        record.status.advance(StageStatus::Done)
    }

    async fn submit_runs(
        &self,
        index: usize,
        runs: &[RunConfig],
        project: &ProjectConfig,
        submitter: &JobSubmitter,
        record: &mut StageRecord,
        previous: &mut Option<JobHandle>,
    ) -> Result<()> {
        for (run_index, run) in runs.iter().enumerate() {
            let handle = submitter.submit(run, project, previous.as_ref()).await?;
            self.observer.on_job_submitted(index, run_index, &handle);
            record.job_handles.push(handle.clone());
            *previous = Some(handle);
        }
        Ok(())
    }

    async fn execute_runs(
        &self,
        index: usize,
        runs: &[RunConfig],
        registry: &ModelRegistry,
        executor: &dyn StageExecutor,
        record: &mut StageRecord,
    ) -> Result<()> {
        for (run_index, run) in runs.iter().enumerate() {
            let job = TrainingJob::prepare(run, registry)?;
            let outcome = executor.execute(&job).await?;
            self.observer.on_run_executed(index, run_index, &outcome);

            if !outcome.success {
                let message = match (outcome.exit_code, outcome.detail.is_empty()) {
                    (Some(code), true) => format!("trainer exited with status {code}"),
                    (None, true) => "trainer was terminated by a signal".to_string(),
                    (_, false) => outcome.detail.clone(),
                };
                return Err(TrainTrackError::ExecutionFailed {
                    run: run_index,
                    message,
                });
            }
            record.outcomes.push(outcome);
        }
        Ok(())
    }
}

enum Dispatch<'a> {
    Batch(&'a JobSubmitter),
    Local {
        registry: Arc<ModelRegistry>,
        executor: Arc<dyn StageExecutor>,
    },
}
