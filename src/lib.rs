pub mod activation;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod dist;
pub mod error;
pub mod layers;
pub mod loss;
pub mod math;
pub mod model;
pub mod optim;
pub mod train;

// Convenience re-exports
pub use checkpoint::{ArtifactLayout, CheckpointStore, LossHistory, RotatingArtifactStore, Snapshot};
pub use config::{Args, TrainConfig};
pub use data::{DataLoader, Dataset, DistributedSampler, Sample, SyntheticDataset, TracesDataset};
pub use dist::{Communicator, DistributedContext, ThreadGroup};
pub use error::{Result, TrainError};
pub use loss::{loss_criterion, LossWeights};
pub use model::{DenseWaveModel, DistributedModel, WaveField, WaveModel};
pub use optim::{Adam, Optimizer, ReduceLrOnPlateau};
pub use train::{EarlyStopper, EpochStats, RunningAverage, Trainer};
