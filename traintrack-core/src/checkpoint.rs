//! Checkpoint lookup for resumed stages.
//!
//! A resumable run lives at `<artifact_library>/.../<run_id>/checkpoints/last.ckpt`.
//! The run's hyperparameters are read back as the base config of the resumed stage.

use crate::config::{ConfigMap, parse_yaml_mapping};
use crate::error::{Result, TrainTrackError};
use crate::search::{EntryKind, find_named};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Key under which a checkpoint embeds its hyperparameters.
pub const HYPER_PARAMETERS_KEY: &str = "hyper_parameters";

/// Hyperparameter sidecar written next to `checkpoints/` by the trainer's loggers.
pub const HPARAMS_FILE: &str = "hparams.yaml";

/// Finds a prior run's checkpoint by run identifier.
#[derive(Debug, Clone, Default)]
pub struct CheckpointLocator;

impl CheckpointLocator {
    /// Return `<match>/checkpoints/last.ckpt` for the first directory named `run_id`
    /// under `base_path`. The checkpoint file itself is not checked.
    pub fn find(&self, run_id: &str, base_path: &Path) -> Result<PathBuf> {
        find_named(base_path, run_id, EntryKind::Dir)
            .map(|run_dir| run_dir.join("checkpoints").join("last.ckpt"))
            .ok_or_else(|| TrainTrackError::CheckpointNotFound {
                run_id: run_id.to_string(),
                search_root: base_path.to_path_buf(),
            })
    }
}

/// Reads the hyperparameter mapping stored with a checkpoint.
pub trait CheckpointReader: Send + Sync {
    fn read_hyper_parameters(&self, checkpoint: &Path) -> Result<ConfigMap>;
}

/// Reads hyperparameters from a text checkpoint document, falling back to the run's
/// `hparams.yaml` when the checkpoint is binary or carries no mapping.
#[derive(Debug, Clone, Default)]
pub struct HparamsReader;

impl HparamsReader {
    fn from_document(checkpoint: &Path) -> Option<ConfigMap> {
        let bytes = std::fs::read(checkpoint).ok()?;
        let text = std::str::from_utf8(&bytes).ok()?;
        let mut doc = parse_yaml_mapping(text, checkpoint).ok()?;
        match doc.remove(HYPER_PARAMETERS_KEY)? {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    fn sidecar(checkpoint: &Path) -> Option<PathBuf> {
        // <run_dir>/checkpoints/last.ckpt -> <run_dir>/hparams.yaml
        let run_dir = checkpoint.parent()?.parent()?;
        Some(run_dir.join(HPARAMS_FILE))
    }
}

impl CheckpointReader for HparamsReader {
    fn read_hyper_parameters(&self, checkpoint: &Path) -> Result<ConfigMap> {
        if let Some(map) = Self::from_document(checkpoint) {
            return Ok(map);
        }

        match Self::sidecar(checkpoint).filter(|p| p.is_file()) {
            Some(sidecar) => {
                let text = std::fs::read_to_string(&sidecar).map_err(|e| {
                    TrainTrackError::io(format!("reading {}", sidecar.display()), e)
                })?;
                parse_yaml_mapping(&text, &sidecar)
            }
            None if !checkpoint.exists() => Err(TrainTrackError::io(
                format!("reading {}", checkpoint.display()),
                std::io::Error::from(std::io::ErrorKind::NotFound),
            )),
            None => Err(TrainTrackError::parse(
                checkpoint,
                format!("no '{HYPER_PARAMETERS_KEY}' mapping and no {HPARAMS_FILE} beside it"),
            )),
        }
    }
}
