//! # TrainTrack Core
//!
//! Core library for TrainTrack, a staged ML training pipeline runner.
//! Resolves per-stage configuration, expands hyperparameter sweeps, locates
//! checkpoints for resumed stages, and dispatches runs either to a batch
//! scheduler or to a local trainer process.

pub mod args;
pub mod checkpoint;
pub mod config;
pub mod env;
pub mod error;
pub mod observe;
pub mod orchestrator;
pub mod registry;
pub mod resolver;
pub mod search;
pub mod submit;
pub mod sweep;
pub mod trainer;

// Re-export commonly used types at the crate root.
pub use args::{estimate_type, parse_args, to_arg_string, to_arg_tokens};
pub use checkpoint::{CheckpointLocator, CheckpointReader, HparamsReader};
pub use config::{
    ConfigMap, Libraries, LoggerKind, PipelineConfig, ProjectConfig, RunArgs, StageDescriptor,
};
pub use error::{Result, TrainTrackError};
pub use observe::{NoOpObserver, PipelineObserver, TracingObserver};
pub use orchestrator::{PipelineOrchestrator, PipelineReport, StageRecord, StageStatus};
pub use registry::{ModelEntry, ModelRegistry};
pub use resolver::{ConfigResolver, ResolvedConfig};
pub use submit::{
    Dependency, JobHandle, JobSubmitter, SchedulerClient, SlurmClient, SubmissionRequest,
};
pub use sweep::{RunConfig, SweepExpander};
pub use trainer::{
    LoggerSpec, ProcessExecutor, RunOutcome, StageExecutor, TrainerSettings, TrainingJob,
};
