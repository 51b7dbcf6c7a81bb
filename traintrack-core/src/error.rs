//! Error types for the TrainTrack core library.
//!
//! Uses `thiserror` for structured variants covering configuration lookup,
//! checkpoint resume, model lookup, batch submission, and local execution.

use std::path::PathBuf;

/// Top-level error type for TrainTrack.
#[derive(Debug, thiserror::Error)]
pub enum TrainTrackError {
    #[error("Config file '{name}' not found under {}", search_root.display())]
    ConfigNotFound { name: String, search_root: PathBuf },

    #[error("Failed to parse {}: {message}", path.display())]
    ConfigParse { path: PathBuf, message: String },

    #[error("No run directory named '{run_id}' under {}", search_root.display())]
    CheckpointNotFound { run_id: String, search_root: PathBuf },

    #[error("Model or callback '{name}' not found in group '{group}'")]
    ModelNotFound { group: String, name: String },

    #[error("Job submission failed: {message}")]
    JobSubmission { message: String },

    #[error("Missing required key: {key}")]
    MissingKey { key: String },

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error("Run {run} failed: {message}")]
    ExecutionFailed { run: usize, message: String },

    #[error("IO error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stage {index} ({stage}) failed: {source}")]
    Stage {
        index: usize,
        stage: String,
        #[source]
        source: Box<TrainTrackError>,
    },
}

impl TrainTrackError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::ConfigParse {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn submission(message: impl Into<String>) -> Self {
        Self::JobSubmission {
            message: message.into(),
        }
    }

    pub fn missing_key(key: impl Into<String>) -> Self {
        Self::MissingKey { key: key.into() }
    }

    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Attach the failing stage to an error.
    pub fn in_stage(self, index: usize, stage: impl Into<String>) -> Self {
        Self::Stage {
            index,
            stage: stage.into(),
            source: Box::new(self),
        }
    }

    /// The underlying error, looking through any stage wrapper.
    pub fn root(&self) -> &TrainTrackError {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type alias for TrainTrack.
pub type Result<T> = std::result::Result<T, TrainTrackError>;
