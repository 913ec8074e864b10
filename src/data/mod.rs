pub mod loader;
pub mod sampler;
pub mod synthetic;
pub mod traces;

pub use loader::DataLoader;
pub use sampler::DistributedSampler;
pub use synthetic::SyntheticDataset;
pub use traces::{read_sample, write_sample, GridDims, InputTransform, Normalizer, TracesDataset};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::wave_field::WaveField;

/// One training pair: flattened geology grid and the recorded E/N/Z traces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub input: Vec<f64>,
    pub target: WaveField,
}

/// Fixed-length, indexable collection of samples.
pub trait Dataset: Send + Sync {
    fn len(&self) -> usize;

    fn get(&self, index: usize) -> Result<Sample>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<D: Dataset + ?Sized> Dataset for std::sync::Arc<D> {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        (**self).get(index)
    }
}
