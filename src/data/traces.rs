use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::data::{Dataset, Sample};
use crate::error::{Result, TrainError};

const NORMAL_EPS: f64 = 1e-5;

/// Spatial and temporal sizes of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridDims {
    pub s_in: usize,
    pub s_in_z: usize,
    pub s_out: usize,
    pub t_out: usize,
}

impl GridDims {
    /// Values in one flattened geology grid: `S_in × S_in × S_in_z`.
    pub fn input_len(&self) -> usize {
        self.s_in * self.s_in * self.s_in_z
    }

    /// Values in one wave component: `S_out × S_out × T_out`.
    pub fn output_len(&self) -> usize {
        self.s_out * self.s_out * self.t_out
    }
}

/// Preprocessing applied to the geology grids once, at load time.
#[derive(Debug, Clone, PartialEq)]
pub enum InputTransform {
    Identity,
    /// Fits a [`Normalizer`] on the loaded samples and applies it.
    Normal,
    /// Applies statistics fitted elsewhere, normally on the training set.
    NormalWith(Normalizer),
}

/// Per grid point standardisation: `(x - mean) / (std + 1e-5)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalizer {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl Normalizer {
    /// Population mean and std of every grid point over `samples`.
    pub fn fit(samples: &[Sample]) -> Normalizer {
        let width = samples.first().map_or(0, |s| s.input.len());
        let count = samples.len() as f64;

        let mut mean = vec![0.0; width];
        for s in samples {
            for (m, x) in mean.iter_mut().zip(&s.input) {
                *m += x / count;
            }
        }
        let mut var = vec![0.0; width];
        for s in samples {
            for ((v, m), x) in var.iter_mut().zip(&mean).zip(&s.input) {
                *v += (x - m).powi(2) / count;
            }
        }
        let std = var.into_iter().map(f64::sqrt).collect();
        Normalizer { mean, std }
    }

    pub fn apply(&self, samples: &mut [Sample]) -> Result<()> {
        for s in samples.iter_mut() {
            if s.input.len() != self.mean.len() {
                return Err(TrainError::Dataset(format!(
                    "normaliser fitted on {} grid points, sample has {}",
                    self.mean.len(),
                    s.input.len()
                )));
            }
            for ((x, m), sd) in s.input.iter_mut().zip(&self.mean).zip(&self.std) {
                *x = (*x - m) / (sd + NORMAL_EPS);
            }
        }
        Ok(())
    }
}

/// Samples read from `<root>/<dir>/*.bin`, each a bincode-encoded [`Sample`].
///
/// Files are taken in lexical order, directory by directory, until `n`
/// samples are collected.
#[derive(Debug, Clone)]
pub struct TracesDataset {
    samples: Vec<Sample>,
    normalizer: Option<Normalizer>,
}

impl TracesDataset {
    pub fn open(
        root: &Path,
        dirs: &[String],
        n: usize,
        dims: GridDims,
        transform: InputTransform,
    ) -> Result<TracesDataset> {
        let files = Self::collect_files(root, dirs, n)?;
        let mut samples = Vec::with_capacity(files.len());
        for path in &files {
            let sample = read_sample(path)?;
            Self::check_dims(path, &sample, dims)?;
            samples.push(sample);
        }

        let normalizer = match transform {
            InputTransform::Identity => None,
            InputTransform::Normal => Some(Normalizer::fit(&samples)),
            InputTransform::NormalWith(fitted) => Some(fitted),
        };
        if let Some(n) = &normalizer {
            n.apply(&mut samples)?;
        }
        info!(samples = samples.len(), dirs = ?dirs, normalized = normalizer.is_some(), "traces dataset loaded");
        Ok(TracesDataset { samples, normalizer })
    }

    /// Statistics the inputs were standardised with, if any.
    pub fn normalizer(&self) -> Option<&Normalizer> {
        self.normalizer.as_ref()
    }

    fn collect_files(root: &Path, dirs: &[String], n: usize) -> Result<Vec<PathBuf>> {
        let mut files = Vec::with_capacity(n);
        for dir in dirs {
            let dir_path = root.join(dir);
            let mut entries: Vec<PathBuf> = fs::read_dir(&dir_path)
                .map_err(|e| TrainError::Dataset(format!("{}: {e}", dir_path.display())))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "bin"))
                .collect();
            entries.sort();
            debug!(dir = %dir_path.display(), files = entries.len(), "scanned sample directory");
            files.extend(entries.into_iter().take(n - files.len()));
            if files.len() == n {
                return Ok(files);
            }
        }
        Err(TrainError::Dataset(format!(
            "requested {n} samples but only {} found under {}",
            files.len(),
            root.display()
        )))
    }

    fn check_dims(path: &Path, sample: &Sample, dims: GridDims) -> Result<()> {
        if sample.input.len() != dims.input_len() {
            return Err(TrainError::Dataset(format!(
                "{}: input has {} values, expected {}",
                path.display(),
                sample.input.len(),
                dims.input_len()
            )));
        }
        if sample.target.channel_len() != Some(dims.output_len()) {
            return Err(TrainError::Dataset(format!(
                "{}: wave components do not all have {} values",
                path.display(),
                dims.output_len()
            )));
        }
        Ok(())
    }
}

impl Dataset for TracesDataset {
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

pub fn read_sample(path: &Path) -> Result<Sample> {
    let file = fs::File::open(path)?;
    bincode::deserialize_from(BufReader::new(file))
        .map_err(|e| TrainError::Dataset(format!("{}: {e}", path.display())))
}

/// Writes `sample` in the on-disk layout [`TracesDataset::open`] reads.
pub fn write_sample(path: &Path, sample: &Sample) -> Result<()> {
    let file = fs::File::create(path)?;
    bincode::serialize_into(BufWriter::new(file), sample)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::wave_field::WaveField;
    use tempfile::tempdir;

    const DIMS: GridDims = GridDims { s_in: 2, s_in_z: 1, s_out: 1, t_out: 3 };

    fn sample(v: f64) -> Sample {
        Sample {
            input: vec![v, 2.0 * v, 1.0, -v],
            target: WaveField::new(vec![v; 3], vec![1.0; 3], vec![0.5; 3]),
        }
    }

    fn populate(root: &Path, dir: &str, values: &[f64]) {
        let d = root.join(dir);
        fs::create_dir_all(&d).unwrap();
        for (i, v) in values.iter().enumerate() {
            write_sample(&d.join(format!("sample_{i:05}.bin")), &sample(*v)).unwrap();
        }
    }

    #[test]
    fn reads_across_directories_in_order() {
        let root = tempdir().unwrap();
        populate(root.path(), "train_a", &[1.0, 2.0]);
        populate(root.path(), "train_b", &[3.0, 4.0]);
        let dirs = vec!["train_a".to_string(), "train_b".to_string()];
        let ds = TracesDataset::open(root.path(), &dirs, 3, DIMS, InputTransform::Identity).unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.get(2).unwrap(), sample(3.0));
    }

    #[test]
    fn too_few_files_is_an_error() {
        let root = tempdir().unwrap();
        populate(root.path(), "val", &[1.0]);
        let err = TracesDataset::open(root.path(), &["val".into()], 2, DIMS, InputTransform::Identity).unwrap_err();
        assert!(matches!(err, TrainError::Dataset(_)));
    }

    #[test]
    fn wrong_dims_are_rejected() {
        let root = tempdir().unwrap();
        populate(root.path(), "val", &[1.0]);
        let dims = GridDims { s_in: 3, ..DIMS };
        assert!(TracesDataset::open(root.path(), &["val".into()], 1, dims, InputTransform::Identity).is_err());
    }

    #[test]
    fn normal_transform_centres_each_grid_point() {
        let root = tempdir().unwrap();
        populate(root.path(), "train", &[1.0, 2.0, 3.0]);
        let ds = TracesDataset::open(root.path(), &["train".into()], 3, DIMS, InputTransform::Normal).unwrap();
        for k in 0..4 {
            let mean: f64 = (0..3).map(|i| ds.get(i).unwrap().input[k]).sum::<f64>() / 3.0;
            assert!(mean.abs() < 1e-12);
        }
        // Constant grid point: zero variance, stays finite.
        assert!((0..3).all(|i| ds.get(i).unwrap().input[2] == 0.0));
    }

    #[test]
    fn validation_reuses_training_statistics() {
        let root = tempdir().unwrap();
        populate(root.path(), "train", &[1.0, 2.0, 3.0]);
        populate(root.path(), "val", &[5.0, 7.0]);
        let train = TracesDataset::open(root.path(), &["train".into()], 3, DIMS, InputTransform::Normal).unwrap();
        let fitted = train.normalizer().cloned().unwrap();
        for (m, want) in fitted.mean.iter().zip([2.0, 4.0, 1.0, -2.0]) {
            assert!((m - want).abs() < 1e-12);
        }

        let val =
            TracesDataset::open(root.path(), &["val".into()], 2, DIMS, InputTransform::NormalWith(fitted.clone())).unwrap();
        let expected = (5.0 - fitted.mean[0]) / (fitted.std[0] + NORMAL_EPS);
        assert!((val.get(0).unwrap().input[0] - expected).abs() < 1e-12);
        // Own statistics would centre the two val samples around zero.
        let mean0 = (val.get(0).unwrap().input[0] + val.get(1).unwrap().input[0]) / 2.0;
        assert!(mean0 > 1.0);
        assert_eq!(val.normalizer(), Some(&fitted));
    }

    #[test]
    fn normalizer_rejects_other_grid_widths() {
        let fitted = Normalizer { mean: vec![0.0; 3], std: vec![1.0; 3] };
        let mut samples = vec![sample(1.0)];
        assert!(matches!(fitted.apply(&mut samples), Err(TrainError::Dataset(_))));
    }
}
