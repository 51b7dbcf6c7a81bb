//! Integration tests for the TrainTrack pipeline.
//!
//! These tests build a project on disk (model library, stage configs, batch
//! configs, a prior run's checkpoint) and drive it through the orchestrator
//! with a recording scheduler and a recording trainer.

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use traintrack_core::error::{Result, TrainTrackError};
use traintrack_core::trainer::LoggerSpec;
use traintrack_core::{
    Dependency, JobHandle, JobSubmitter, PipelineConfig, PipelineObserver, PipelineOrchestrator,
    ProjectConfig, RunArgs, RunOutcome, SchedulerClient, StageDescriptor, StageExecutor,
    StageStatus, SubmissionRequest, TrainingJob, parse_args,
};

struct RecordingScheduler {
    requests: Mutex<Vec<SubmissionRequest>>,
}

#[async_trait]
impl SchedulerClient for RecordingScheduler {
    async fn submit(&self, request: &SubmissionRequest) -> Result<JobHandle> {
        let mut requests = self.requests.lock().await;
        requests.push(request.clone());
        Ok(JobHandle::new(format!("{}", 9000 + requests.len())))
    }
}

struct RecordingTrainer {
    jobs: Mutex<Vec<TrainingJob>>,
}

#[async_trait]
impl StageExecutor for RecordingTrainer {
    async fn execute(&self, job: &TrainingJob) -> Result<RunOutcome> {
        self.jobs.lock().await.push(job.clone());
        Ok(RunOutcome::succeeded())
    }
}

/// Observer that keeps a readable event log.
#[derive(Default)]
struct RecordingObserver {
    events: StdMutex<Vec<String>>,
}

impl RecordingObserver {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl PipelineObserver for RecordingObserver {
    fn on_stage_start(&self, index: usize, stage: &StageDescriptor) {
        self.push(format!("start {index} {stage}"));
    }
    fn on_stage_expanded(&self, index: usize, runs: usize) {
        self.push(format!("expanded {index} {runs}"));
    }
    fn on_job_submitted(&self, index: usize, run: usize, handle: &JobHandle) {
        self.push(format!("submitted {index}.{run} {handle}"));
    }
    fn on_run_executed(&self, index: usize, run: usize, outcome: &RunOutcome) {
        self.push(format!("executed {index}.{run} {}", outcome.success));
    }
    fn on_stage_done(&self, index: usize) {
        self.push(format!("done {index}"));
    }
    fn on_stage_failed(&self, index: usize, err: &TrainTrackError) {
        self.push(format!("failed {index} {}", err.root()));
    }
}

/// Write a file, creating parent directories.
fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

struct Project {
    dir: tempfile::TempDir,
}

impl Project {
    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    fn config(&self) -> ProjectConfig {
        ProjectConfig::load(&self.path("configs/project_config.yaml")).unwrap()
    }

    fn pipeline(&self) -> Vec<StageDescriptor> {
        PipelineConfig::load(&self.path("configs/pipeline.yaml"))
            .unwrap()
            .stage_list
    }
}

fn project(serial: bool) -> Project {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let p = |rel: &str| root.join(rel);

    write(
        &p("configs/project_config.yaml"),
        &format!(
            "libraries:\n  model_library: {}\n  artifact_library: {}\nlogger: wandb\nserial: {serial}\ncustom_batch_setup:\n  - conda activate tracking\ncommand_line_setup:\n  - module load cuda\n",
            p("LightningModules").display(),
            p("artifacts").display(),
        ),
    );
    write(
        &p("configs/batch_cpu.yaml"),
        "job-name: processing\ntime: \"1:00:00\"\nnodes: 1\n",
    );
    write(
        &p("configs/batch_gpu.yaml"),
        "job-name: training\ngpus: 1\nexclusive: true\n",
    );
    write(
        &p("configs/pipeline.yaml"),
        &format!(
            r#"
stage_list:
  - set: Processing
    config: prepare.yaml
    batch_config: {cpu}
  - set: GNN
    config: train_gnn.yaml
    batch_config: {gpu}
    batch_setup: true
    override:
      max_epochs: 3
"#,
            cpu = p("configs/batch_cpu.yaml").display(),
            gpu = p("configs/batch_gpu.yaml").display(),
        ),
    );

    write(
        &p("LightningModules/Processing/Models/processor.py"),
        "class FeatureStore:\n    pass\n",
    );
    write(
        &p("LightningModules/Processing/prepare.yaml"),
        "name: FeatureStore\nmax_epochs: 1\ninput_dir: ${TRAINTRACK_TEST_UNSET_DATA}/raw\n",
    );
    write(
        &p("LightningModules/GNN/Models/gnn.py"),
        "class InteractionGNN(LightningModule):\n    pass\n\nclass GNNTelemetry(Callback):\n    pass\n",
    );
    write(
        &p("LightningModules/GNN/configs/train_gnn.yaml"),
        "name: InteractionGNN\nmax_epochs: 50\ncallbacks: GNNTelemetry\nlr: [0.001, 0.0001]\nhidden: 64\n",
    );

    write(
        &p("artifacts/wandb/run42/checkpoints/last.ckpt"),
        "hyper_parameters:\n  name: InteractionGNN\n  set_name: GNN\n  max_epochs: 50\n  lr: 0.002\n  logger: tb\n  project: tracking\n",
    );

    Project { dir }
}

#[tokio::test]
async fn test_batch_pipeline_end_to_end() {
    let project = project(true);
    let scheduler = Arc::new(RecordingScheduler {
        requests: Mutex::new(Vec::new()),
    });
    let observer = Arc::new(RecordingObserver::default());
    let orchestrator = PipelineOrchestrator::new()
        .with_submitter(JobSubmitter::new(scheduler.clone()))
        .with_observer(observer.clone());

    let report = orchestrator
        .run(
            &project.pipeline(),
            &project.config(),
            &RunArgs {
                inference: None,
                batch: true,
            },
        )
        .await
        .unwrap();

    assert_eq!(report.total_runs(), 3);
    assert!(report.stages.iter().all(|s| s.status == StageStatus::Done));

    let requests = scheduler.requests.lock().await;
    assert_eq!(requests.len(), 3);

    // Resources come from each stage's own batch config, in file order.
    let keys: Vec<&str> = requests[1].resources.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["job-name", "gpus", "exclusive"]);
    assert_eq!(requests[0].resources.get("nodes"), Some(&json!(1)));

    // One handle threads through every submission.
    assert_eq!(requests[0].dependency, None);
    assert_eq!(
        requests[1].dependency,
        Some(Dependency::AfterOk(JobHandle::new("9001")))
    );
    assert_eq!(
        requests[2].dependency,
        Some(Dependency::AfterOk(JobHandle::new("9002")))
    );

    // Setup commands only for the stage that asked for them.
    assert!(requests[0].setup_commands.is_empty());
    assert_eq!(requests[1].setup_commands, vec!["module load cuda"]);

    // The job command is the batch setup followed by the run's token stream.
    let lines: Vec<&str> = requests[1].command.lines().collect();
    assert_eq!(lines[0], "conda activate tracking");
    let invocation = lines[1]
        .strip_prefix("traintrack batch-stage ")
        .unwrap();
    let tokens: Vec<&str> = invocation.split(' ').collect();
    let run = parse_args(tokens);
    assert_eq!(run.get("set_name"), Some(&json!("GNN")));
    assert_eq!(run.get("lr"), Some(&json!(0.001)));
    assert_eq!(run.get("max_epochs"), Some(&json!(3)));
    assert_eq!(run.get("logger"), Some(&json!("wandb")));
    assert_eq!(run.get("resume_id"), Some(&json!(null)));
    let project_file = fs::canonicalize(project.path("configs/project_config.yaml")).unwrap();
    assert_eq!(
        run.get("project-config"),
        Some(&json!(project_file.display().to_string()))
    );

    // Unset environment variables are left as written, and quoted for the shell.
    assert!(
        requests[0]
            .command
            .contains("--input_dir '${TRAINTRACK_TEST_UNSET_DATA}/raw'")
    );

    assert_eq!(
        observer.events(),
        vec![
            "start 0 Processing/prepare.yaml",
            "expanded 0 1",
            "submitted 0.0 9001",
            "done 0",
            "start 1 GNN/train_gnn.yaml",
            "expanded 1 2",
            "submitted 1.0 9002",
            "submitted 1.1 9003",
            "done 1",
        ]
    );
}

#[tokio::test]
async fn test_parallel_project_submits_without_dependencies() {
    let project = project(false);
    let scheduler = Arc::new(RecordingScheduler {
        requests: Mutex::new(Vec::new()),
    });
    let orchestrator =
        PipelineOrchestrator::new().with_submitter(JobSubmitter::new(scheduler.clone()));

    orchestrator
        .run(
            &project.pipeline(),
            &project.config(),
            &RunArgs {
                inference: None,
                batch: true,
            },
        )
        .await
        .unwrap();

    let requests = scheduler.requests.lock().await;
    assert_eq!(requests.len(), 3);
    assert!(requests.iter().all(|r| r.dependency.is_none()));
}

#[tokio::test]
async fn test_local_pipeline_discovers_models_and_resumes() {
    let project = project(false);
    let trainer = Arc::new(RecordingTrainer {
        jobs: Mutex::new(Vec::new()),
    });
    let orchestrator = PipelineOrchestrator::new().with_executor(trainer.clone());

    let mut stages = project.pipeline();
    let mut resumed = StageDescriptor::new("GNN", "train_gnn.yaml");
    resumed.resume_id = Some("run42".into());
    resumed.overrides = Some(
        json!({"max_epochs": 80})
            .as_object()
            .cloned()
            .unwrap(),
    );
    stages.push(resumed);

    let report = orchestrator
        .run(
            &stages,
            &project.config(),
            &RunArgs {
                inference: Some(false),
                batch: false,
            },
        )
        .await
        .unwrap();
    assert_eq!(report.stages.len(), 3);

    let jobs = trainer.jobs.lock().await;
    assert_eq!(jobs.len(), 4);

    let fresh = &jobs[1];
    assert_eq!(fresh.model.name, "InteractionGNN");
    assert_eq!(fresh.callbacks.len(), 1);
    assert_eq!(fresh.callbacks[0].name, "GNNTelemetry");
    assert_eq!(fresh.trainer.max_epochs, 3);
    assert!(!fresh.inference);
    assert_eq!(
        fresh.logger,
        LoggerSpec::Wandb {
            project: "my_project".into(),
            save_dir: project.path("artifacts"),
            id: None,
        }
    );

    let resumed = &jobs[3];
    assert_eq!(resumed.trainer.max_epochs, 80);
    assert_eq!(resumed.config.get("lr"), Some(&json!(0.002)));
    assert_eq!(
        resumed.trainer.checkpoint_path,
        Some(project.path("artifacts/wandb/run42/checkpoints/last.ckpt"))
    );
    assert_eq!(
        resumed.logger,
        LoggerSpec::Tb {
            name: "tracking".into(),
            save_dir: project.path("artifacts"),
            version: Some("run42".into()),
        }
    );
}

#[tokio::test]
async fn test_unknown_resume_id_stops_before_later_stages() {
    let project = project(true);
    let scheduler = Arc::new(RecordingScheduler {
        requests: Mutex::new(Vec::new()),
    });
    let observer = Arc::new(RecordingObserver::default());
    let orchestrator = PipelineOrchestrator::new()
        .with_submitter(JobSubmitter::new(scheduler.clone()))
        .with_observer(observer.clone());

    let mut stages = project.pipeline();
    stages[1].resume_id = Some("does-not-exist".into());

    let err = orchestrator
        .run(
            &stages,
            &project.config(),
            &RunArgs {
                inference: None,
                batch: true,
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err.root(),
        TrainTrackError::CheckpointNotFound { run_id, .. } if run_id == "does-not-exist"
    ));
    assert!(err.to_string().contains("Stage 1 (GNN/train_gnn.yaml)"));
    assert_eq!(scheduler.requests.lock().await.len(), 1);
    let events = observer.events();
    assert_eq!(
        events.last().unwrap(),
        &format!(
            "failed 1 No run directory named 'does-not-exist' under {}",
            project.path("artifacts").display()
        )
    );
}
