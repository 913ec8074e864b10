use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::data::{Dataset, Sample};
use crate::error::{Result, TrainError};
use crate::math::matrix::Matrix;
use crate::model::wave_field::WaveField;

/// Deterministic stand-in for recorded traces: each component is a fixed
/// linear response of the input grid plus a constant offset. Used for smoke
/// runs without data on disk and throughout the tests.
#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    samples: Vec<Sample>,
}

impl SyntheticDataset {
    /// `len` samples with inputs of `input_len` values and components of
    /// `output_len` values. The same `seed` always yields the same samples.
    pub fn new(len: usize, input_len: usize, output_len: usize, seed: u64) -> SyntheticDataset {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let responses: Vec<Matrix> = (0..3)
            .map(|_| Matrix::xavier(input_len, output_len, &mut rng))
            .collect();

        let samples = (0..len)
            .map(|_| {
                let input: Vec<f64> = (0..input_len).map(|_| rng.gen::<f64>() * 2.0 - 1.0).collect();
                let x = Matrix::row(&input);
                let mut channels = responses.iter().map(|r| {
                    let mut y = (&x * r).data;
                    y.iter_mut().for_each(|v| *v += 1.0);
                    y
                });
                let target = WaveField::new(
                    channels.next().unwrap_or_default(),
                    channels.next().unwrap_or_default(),
                    channels.next().unwrap_or_default(),
                );
                Sample { input, target }
            })
            .collect();

        SyntheticDataset { samples }
    }
}

impl Dataset for SyntheticDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        self.samples
            .get(index)
            .cloned()
            .ok_or_else(|| TrainError::Dataset(format!("index {index} out of range for {} samples", self.samples.len())))
    }
}
