//! Pipeline progress events.
//!
//! The orchestrator reports every stage transition to a [`PipelineObserver`].
//! [`TracingObserver`] turns events into `tracing` records; tests and embedders
//! can plug in their own.

use crate::config::StageDescriptor;
use crate::error::TrainTrackError;
use crate::submit::JobHandle;
use crate::trainer::RunOutcome;
use tracing::{debug, error, info, warn};

/// Callback trait for pipeline progress.
pub trait PipelineObserver: Send + Sync {
    /// Called before a stage is resolved.
    fn on_stage_start(&self, index: usize, stage: &StageDescriptor);
    /// Called once the stage config is resolved. `resumed` is true when it came from a checkpoint.
    fn on_stage_resolved(&self, _index: usize, _keys: usize, _resumed: bool) {}
    /// Called with the number of runs the stage expanded into.
    fn on_stage_expanded(&self, index: usize, runs: usize);
    /// Called after each batch submission.
    fn on_job_submitted(&self, index: usize, run: usize, handle: &JobHandle);
    /// Called after each local run.
    fn on_run_executed(&self, index: usize, run: usize, outcome: &RunOutcome);
    /// Called when every run of the stage has been dispatched.
    fn on_stage_done(&self, index: usize);
    /// Called when the stage aborts the pipeline.
    fn on_stage_failed(&self, index: usize, err: &TrainTrackError);
}

/// Observer that writes events to `tracing`.
#[derive(Debug, Clone, Default)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn on_stage_start(&self, index: usize, stage: &StageDescriptor) {
        info!(stage = index, set = %stage.set_name, config = %stage.config_file_name, "Running stage");
    }

    fn on_stage_resolved(&self, index: usize, keys: usize, resumed: bool) {
        debug!(stage = index, keys, resumed, "Stage config resolved");
    }

    fn on_stage_expanded(&self, index: usize, runs: usize) {
        if runs == 0 {
            warn!(stage = index, "Sweep produced no runs; an axis is empty");
        } else {
            info!(stage = index, runs, "Stage expanded");
        }
    }

    fn on_job_submitted(&self, index: usize, run: usize, handle: &JobHandle) {
        info!(stage = index, run, job_id = %handle, "Submitted batch job");
    }

    fn on_run_executed(&self, index: usize, run: usize, outcome: &RunOutcome) {
        if outcome.success {
            info!(stage = index, run, "Run finished");
        } else {
            warn!(stage = index, run, exit_code = ?outcome.exit_code, "Run failed");
        }
    }

    fn on_stage_done(&self, index: usize) {
        debug!(stage = index, "Stage done");
    }

    fn on_stage_failed(&self, index: usize, err: &TrainTrackError) {
        error!(stage = index, error = %err, "Stage failed, aborting pipeline");
    }
}

/// Observer that ignores every event.
pub struct NoOpObserver;

impl PipelineObserver for NoOpObserver {
    fn on_stage_start(&self, _index: usize, _stage: &StageDescriptor) {}
    fn on_stage_expanded(&self, _index: usize, _runs: usize) {}
    fn on_job_submitted(&self, _index: usize, _run: usize, _handle: &JobHandle) {}
    fn on_run_executed(&self, _index: usize, _run: usize, _outcome: &RunOutcome) {}
    fn on_stage_done(&self, _index: usize) {}
    fn on_stage_failed(&self, _index: usize, _err: &TrainTrackError) {}
}
