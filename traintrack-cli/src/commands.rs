//! CLI subcommand handlers.

use crate::Commands;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use traintrack_core::{
    JobSubmitter, ModelRegistry, PipelineConfig, PipelineOrchestrator, PipelineReport,
    ProcessExecutor, ProjectConfig, RunArgs, RunConfig, SlurmClient, StageExecutor,
    TrainingJob, parse_args,
};

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            pipeline,
            project,
            batch,
            inference,
            no_inference,
        } => {
            let run_args = RunArgs {
                inference: inference_flag(inference, no_inference),
                batch,
            };
            run_pipeline(&pipeline, &project, run_args).await
        }
        Commands::BatchStage {
            project_config,
            args,
        } => batch_stage(project_config.as_deref(), &args).await,
    }
}

fn inference_flag(inference: bool, no_inference: bool) -> Option<bool> {
    match (inference, no_inference) {
        (true, _) => Some(true),
        (false, true) => Some(false),
        (false, false) => None,
    }
}

async fn run_pipeline(pipeline: &Path, project: &Path, run_args: RunArgs) -> anyhow::Result<()> {
    let project = ProjectConfig::load(project)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    let pipeline = PipelineConfig::load(pipeline)?;
    tracing::info!(
        stages = pipeline.stage_list.len(),
        batch = run_args.batch,
        serial = project.serial,
        "Starting pipeline"
    );

    let mut orchestrator = PipelineOrchestrator::new();
    if run_args.batch {
        orchestrator = orchestrator.with_submitter(JobSubmitter::new(Arc::new(SlurmClient::new())));
    }

    let report = orchestrator
        .run(&pipeline.stage_list, &project, &run_args)
        .await?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &PipelineReport) {
    println!("Pipeline {} finished", report.run_id);
    for stage in &report.stages {
        println!(
            "  {}. {}/{} [{}] {} run(s)",
            stage.index + 1,
            stage.set_name,
            stage.config_file_name,
            stage.status,
            stage.runs
        );
        if !stage.job_handles.is_empty() {
            let ids: Vec<&str> = stage.job_handles.iter().map(|h| h.as_str()).collect();
            println!("     jobs: {}", ids.join(", "));
        }
    }
}

/// Rebuild a run config from its command-line tokens.
fn run_config_from_tokens(args: &[String]) -> anyhow::Result<RunConfig> {
    let run = RunConfig::from(parse_args(args));
    if run.set_name().is_none() {
        anyhow::bail!("batch-stage needs a --set_name token");
    }
    Ok(run)
}

async fn batch_stage(project_config: Option<&Path>, args: &[String]) -> anyhow::Result<()> {
    let run = run_config_from_tokens(args)?;
    let project = match project_config {
        Some(path) => ProjectConfig::load(path)?,
        None => ProjectConfig::from_env()?,
    };

    let model_library = run
        .get_str("model_library")
        .map(PathBuf::from)
        .unwrap_or_else(|| project.libraries.model_library.clone());
    let registry = ModelRegistry::discover(&model_library)?;
    let job = TrainingJob::prepare(&run, &registry)?;
    tracing::info!(
        model = %job.model.name,
        group = %job.model.group,
        resumed = job.trainer.checkpoint_path.is_some(),
        "Executing batch run"
    );

    let outcome = ProcessExecutor::from_project(&project).execute(&job).await?;
    if !outcome.success {
        anyhow::bail!(
            "Run failed (exit {}): {}",
            outcome
                .exit_code
                .map_or_else(|| "signal".to_string(), |c| c.to_string()),
            outcome.detail
        );
    }
    Ok(())
}
