use crate::data::sampler::DistributedSampler;
use crate::data::{Dataset, Sample};
use crate::error::{Result, TrainError};

/// Batches a rank's shard of a dataset.
///
/// The final batch of an epoch may be short; it is short on every rank
/// alike since shards have equal length.
pub struct DataLoader<D> {
    dataset: D,
    sampler: DistributedSampler,
    batch_size: usize,
}

impl<D: Dataset> DataLoader<D> {
    pub fn new(dataset: D, batch_size: usize, sampler: DistributedSampler) -> Result<DataLoader<D>> {
        if batch_size == 0 {
            return Err(TrainError::Config("batch_size must be at least 1".into()));
        }
        if dataset.is_empty() {
            return Err(TrainError::Dataset("cannot batch an empty dataset".into()));
        }
        Ok(DataLoader {
            dataset,
            sampler,
            batch_size,
        })
    }

    /// Shuffled loader over this rank's shard, as used for both training and
    /// validation data.
    pub fn distributed(dataset: D, batch_size: usize, rank: usize, world_size: usize) -> Result<DataLoader<D>> {
        let sampler = DistributedSampler::new(dataset.len(), rank, world_size);
        DataLoader::new(dataset, batch_size, sampler)
    }

    pub fn set_epoch(&mut self, epoch: usize) {
        self.sampler.set_epoch(epoch);
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches per epoch.
    pub fn len(&self) -> usize {
        self.sampler.num_samples().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    pub fn iter(&self) -> Batches<'_, D> {
        Batches {
            dataset: &self.dataset,
            indices: self.sampler.indices(),
            batch_size: self.batch_size,
            cursor: 0,
        }
    }
}

/// Iterator over one epoch of batches.
pub struct Batches<'a, D> {
    dataset: &'a D,
    indices: Vec<usize>,
    batch_size: usize,
    cursor: usize,
}

impl<D: Dataset> Iterator for Batches<'_, D> {
    type Item = Result<Vec<Sample>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.indices.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.indices.len());
        let batch = self.indices[self.cursor..end]
            .iter()
            .map(|&i| self.dataset.get(i))
            .collect();
        self.cursor = end;
        Some(batch)
    }
}
