use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TrainError>;

/// Everything that can go wrong between process-group bootstrap and the
/// final loss-history flush. None of these are retried.
#[derive(Debug, Error)]
pub enum TrainError {
    /// Rank environment missing or malformed. Fatal before training starts.
    #[error("startup error: {0}")]
    Startup(String),

    /// The process group could not be formed.
    #[error("process group init failed: {0}")]
    GroupInit(String),

    /// A collective failed after the group was formed (peer vanished, short frame).
    #[error("collective `{op}` failed: {reason}")]
    Collective { op: &'static str, reason: String },

    /// Snapshot file exists but cannot be read or decoded.
    #[error("failed to load snapshot {path}: {source}")]
    SnapshotLoad {
        path: PathBuf,
        #[source]
        source: Box<TrainError>,
    },

    /// A running average was read before any update.
    #[error("metric `{0}` queried before any update")]
    MetricUndefined(&'static str),

    /// Running-average updates need a strictly positive weight.
    #[error("invalid metric weight {0}: must be > 0")]
    InvalidWeight(f64),

    /// A rotating artifact the store wrote earlier is no longer on disk.
    #[error("rotating artifact {path} disappeared before eviction")]
    ArtifactRotation { path: PathBuf },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Parameter names or lengths do not line up with the model.
    #[error("model state mismatch: {0}")]
    StateMismatch(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Bincode(#[from] bincode::Error),
}
