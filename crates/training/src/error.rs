use image_dataset::DatasetError;
use std::path::PathBuf;
use thiserror::Error;

/// Rejected run configuration. Fatal: the binaries exit on any of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown optimizer {0:?} (expected SGD or ADAM)")]
    UnknownOptimizer(String),
    #[error("unknown scheduler {0:?} (expected MultiStepLR or CosineAnnealingLR)")]
    UnknownScheduler(String),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

pub type TrainResult<T> = Result<T, TrainError>;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode scalar record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("checkpoint {path}: {msg}")]
    Checkpoint { path: PathBuf, msg: String },
    #[error("train loader produced no batches")]
    EmptyEpoch,
}

impl TrainError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TrainError::Io {
            path: path.into(),
            source,
        }
    }
}
