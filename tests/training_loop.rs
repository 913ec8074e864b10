use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;

use ffno_trainer::checkpoint::{ArtifactLayout, LossHistory, Snapshot};
use ffno_trainer::data::{DataLoader, DistributedSampler, SyntheticDataset};
use ffno_trainer::dist::{Communicator, SingleProcess, ThreadGroup};
use ffno_trainer::math::Matrix;
use ffno_trainer::model::{DenseWaveModel, ModelState, Parameter, WaveField, WaveModel};
use ffno_trainer::optim::{Adam, Optimizer};
use ffno_trainer::train::{EpochStats, Trainer};
use ffno_trainer::{TrainConfig, TrainError};
use tempfile::tempdir;

const INPUT_LEN: usize = 6;
const OUTPUT_LEN: usize = 4;
const NTRAIN: usize = 8;
const NVAL: usize = 4;
const RUN: &str = "run";

fn config(dir: &Path, epochs: usize, batch_size: usize) -> TrainConfig {
    TrainConfig {
        epochs,
        batch_size,
        ntrain: NTRAIN,
        nval: NVAL,
        learning_rate: 1e-2,
        log_dir: dir.join("logs"),
        snapshot_path: dir.join("snapshot.bin"),
        synthetic: true,
        ..TrainConfig::default()
    }
}

fn fresh_model() -> DenseWaveModel {
    DenseWaveModel::new(INPUT_LEN, OUTPUT_LEN, &[5], 7)
}

fn loaders(
    config: &TrainConfig,
    comm: &dyn Communicator,
) -> (DataLoader<SyntheticDataset>, DataLoader<SyntheticDataset>) {
    let loader = |len: usize, seed: u64| {
        let sampler = DistributedSampler::new(len, comm.rank(), comm.world_size());
        DataLoader::new(SyntheticDataset::new(len, INPUT_LEN, OUTPUT_LEN, seed), config.batch_size, sampler).unwrap()
    };
    (loader(NTRAIN, 1), loader(NVAL, 2))
}

fn trainer<M: WaveModel, O: Optimizer>(
    model: M,
    optimizer: O,
    config: &TrainConfig,
    comm: Arc<dyn Communicator>,
) -> Trainer<M, SyntheticDataset, O> {
    let (train, val) = loaders(config, comm.as_ref());
    let rank = comm.rank();
    Trainer::new(model, train, optimizer, val, config, comm, rank).unwrap()
}

fn progress<M: WaveModel, O: Optimizer>(
    trainer: Trainer<M, SyntheticDataset, O>,
) -> (Trainer<M, SyntheticDataset, O>, mpsc::Receiver<EpochStats>) {
    let (tx, rx) = mpsc::channel();
    (trainer.with_progress(tx), rx)
}

fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                out.extend(files_under(&path));
            } else {
                out.push(path);
            }
        }
    }
    out.sort();
    out
}

#[test]
fn resume_starts_at_snapshot_epoch() {
    let dir = tempdir().unwrap();
    let config = config(dir.path(), 5, 4);
    Snapshot {
        model_state: fresh_model().state_dict(),
        epochs_run: 3,
        loss_history: LossHistory::new(),
    }
    .save(&config.snapshot_path)
    .unwrap();

    let t = trainer(fresh_model(), Adam::new(config.learning_rate), &config, Arc::new(SingleProcess));
    assert_eq!(t.epochs_run(), 3);
    let (mut t, rx) = progress(t);
    let last_saved = t.train(RUN).unwrap();

    let epochs: Vec<usize> = rx.try_iter().map(|s| s.epoch).collect();
    assert_eq!(epochs, vec![3, 4]);
    assert_eq!(last_saved, Some(4));
    assert_eq!(Snapshot::load(&config.snapshot_path).unwrap().epochs_run, 4);
}

#[test]
fn resume_restores_snapshot_weights() {
    let dir = tempdir().unwrap();
    let config = config(dir.path(), 2, 4);
    let saved = DenseWaveModel::new(INPUT_LEN, OUTPUT_LEN, &[5], 99).state_dict();
    Snapshot {
        model_state: saved.clone(),
        epochs_run: 2,
        loss_history: LossHistory::new(),
    }
    .save(&config.snapshot_path)
    .unwrap();

    let mut t = trainer(fresh_model(), Adam::new(config.learning_rate), &config, Arc::new(SingleProcess));
    assert_eq!(t.train(RUN).unwrap(), None);
    assert_eq!(t.into_model().state_dict(), saved);
    assert!(files_under(&config.log_dir).is_empty());
}

#[test]
fn mismatched_snapshot_is_fatal() {
    let dir = tempdir().unwrap();
    let config = config(dir.path(), 2, 4);
    let other = DenseWaveModel::new(INPUT_LEN, OUTPUT_LEN, &[3, 3], 0).state_dict();
    Snapshot {
        model_state: other,
        epochs_run: 1,
        loss_history: LossHistory::new(),
    }
    .save(&config.snapshot_path)
    .unwrap();

    let comm: Arc<dyn Communicator> = Arc::new(SingleProcess);
    let (train, val) = loaders(&config, comm.as_ref());
    let result = Trainer::new(fresh_model(), train, Adam::new(1e-3), val, &config, comm, 0);
    match result {
        Err(TrainError::SnapshotLoad { path, .. }) => assert_eq!(path, config.snapshot_path),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("mismatched snapshot was accepted"),
    }
}

#[test]
fn rotation_leaves_only_the_final_history() {
    let dir = tempdir().unwrap();
    let config = config(dir.path(), 5, 4);
    let mut t = trainer(fresh_model(), Adam::new(config.learning_rate), &config, Arc::new(SingleProcess));
    assert_eq!(t.train(RUN).unwrap(), Some(4));

    let layout = ArtifactLayout::new(&config.log_dir);
    let loss_files = files_under(&config.log_dir.join("loss"));
    assert_eq!(loss_files, vec![layout.final_history(RUN, 5)]);

    let history = LossHistory::load_json(&layout.final_history(RUN, 5)).unwrap();
    assert_eq!(history.len(), 5);
    assert!(layout.best_model(RUN, 5).exists());
}

#[test]
fn resumed_run_keeps_the_full_loss_history() {
    let dir = tempdir().unwrap();
    let first = config(dir.path(), 5, 4);
    let mut t = trainer(fresh_model(), Adam::new(first.learning_rate), &first, Arc::new(SingleProcess));
    assert_eq!(t.train(RUN).unwrap(), Some(4));
    let layout = ArtifactLayout::new(&first.log_dir);
    let before = LossHistory::load_json(&layout.final_history(RUN, 5)).unwrap();

    let extended = config(dir.path(), 8, 4);
    let mut t = trainer(fresh_model(), Adam::new(extended.learning_rate), &extended, Arc::new(SingleProcess));
    assert_eq!(t.epochs_run(), 4);
    assert_eq!(t.history().len(), 4);
    t.train(RUN).unwrap();

    let after = LossHistory::load_json(&layout.final_history(RUN, 8)).unwrap();
    assert_eq!(after.len(), 8);
    assert_eq!(after.val_loss_relative[..4], before.val_loss_relative[..4]);
    assert_eq!(after.train_loss_absolute[..4], before.train_loss_absolute[..4]);
}

#[test]
fn zero_save_interval_is_rejected() {
    let dir = tempdir().unwrap();
    let config = TrainConfig { save_every: 0, ..config(dir.path(), 2, 4) };
    let comm: Arc<dyn Communicator> = Arc::new(SingleProcess);
    let (train, val) = loaders(&config, comm.as_ref());
    match Trainer::new(fresh_model(), train, Adam::new(1e-3), val, &config, comm, 0) {
        Err(TrainError::Config(_)) => {}
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("zero save interval was accepted"),
    }
}

/// Wraps a model with one extra parameter that takes no part in the forward
/// pass and counts optimiser steps, so a saved state tells when it was taken.
struct Marked {
    inner: DenseWaveModel,
    marker: Parameter,
}

impl WaveModel for Marked {
    fn forward(&mut self, input: &[f64]) -> WaveField {
        self.inner.forward(input)
    }

    fn backward(&mut self, grad_output: &WaveField) {
        self.inner.backward(grad_output)
    }

    fn parameters(&self) -> Vec<&Parameter> {
        let mut params = self.inner.parameters();
        params.push(&self.marker);
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        let mut params = self.inner.parameters_mut();
        params.push(&mut self.marker);
        params
    }

    fn set_training(&mut self, training: bool) {
        self.inner.set_training(training)
    }

    fn is_training(&self) -> bool {
        self.inner.is_training()
    }
}

struct CountingAdam(Adam);

impl Optimizer for CountingAdam {
    fn step(&mut self, params: Vec<&mut Parameter>) {
        let (markers, rest): (Vec<_>, Vec<_>) = params.into_iter().partition(|p| p.name == "marker");
        for m in markers {
            m.value.data[0] += 1.0;
        }
        self.0.step(rest)
    }

    fn learning_rate(&self) -> f64 {
        self.0.learning_rate()
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.0.set_learning_rate(lr)
    }
}

fn marked() -> Marked {
    Marked {
        inner: fresh_model(),
        marker: Parameter::new("marker", Matrix::zeros(1, 1)),
    }
}

fn best_model_marker(config: &TrainConfig) -> f64 {
    let path = ArtifactLayout::new(&config.log_dir).best_model(RUN, config.epochs);
    let state: ModelState = bincode::deserialize(&fs::read(path).unwrap()).unwrap();
    state["marker"][0]
}

#[test]
fn best_model_is_kept_from_the_first_strict_minimum() {
    let dir = tempdir().unwrap();
    let config = config(dir.path(), 6, 4);
    let mut t = trainer(marked(), CountingAdam(Adam::new(config.learning_rate)), &config, Arc::new(SingleProcess));
    t.train(RUN).unwrap();

    let history = LossHistory::load_json(&ArtifactLayout::new(&config.log_dir).final_history(RUN, 6)).unwrap();
    let mut best = (f64::INFINITY, 0);
    for (ep, &v) in history.val_loss_relative.iter().enumerate() {
        if v < best.0 {
            best = (v, ep);
        }
    }
    let steps_per_epoch = (NTRAIN / 4) as f64;
    assert_eq!(best_model_marker(&config), steps_per_epoch * (best.1 + 1) as f64);
}

#[test]
fn equal_losses_do_not_overwrite_the_best_model() {
    let dir = tempdir().unwrap();
    let config = TrainConfig {
        early_stop_patience: 100,
        ..config(dir.path(), 4, 4)
    };
    // Frozen weights: every epoch reports the same validation loss.
    let mut t = trainer(marked(), CountingAdam(Adam::new(0.0)), &config, Arc::new(SingleProcess));
    t.train(RUN).unwrap();
    assert_eq!(best_model_marker(&config), (NTRAIN / 4) as f64);
}

#[test]
fn data_parallel_matches_single_process() {
    let dir = tempdir().unwrap();
    let single = config(&dir.path().join("single"), 3, 4);
    let mut t = trainer(fresh_model(), Adam::new(single.learning_rate), &single, Arc::new(SingleProcess));
    t.train(RUN).unwrap();
    let expected = t.into_model().state_dict();

    let pair = config(&dir.path().join("pair"), 3, 2);
    let handles: Vec<_> = ThreadGroup::new(2)
        .into_iter()
        .map(|comm| {
            let pair = pair.clone();
            thread::spawn(move || {
                let mut t = trainer(fresh_model(), Adam::new(pair.learning_rate), &pair, Arc::new(comm));
                t.train(RUN).unwrap();
                t.into_model().state_dict()
            })
        })
        .collect();
    let states: Vec<ModelState> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(states[0], states[1]);
    for (name, values) in &expected {
        for (a, b) in values.iter().zip(&states[0][name]) {
            assert!((a - b).abs() < 1e-8, "{name}: {a} vs {b}");
        }
    }
}

#[test]
fn ranks_stop_at_the_same_epoch() {
    let dir = tempdir().unwrap();
    let base = TrainConfig {
        early_stop_patience: 2,
        early_stop_min_delta: 0.5,
        ..config(dir.path(), 20, 2)
    };
    let handles: Vec<_> = ThreadGroup::new(2)
        .into_iter()
        .map(|comm| {
            let config = base.clone();
            thread::spawn(move || {
                let t = trainer(fresh_model(), Adam::new(config.learning_rate), &config, Arc::new(comm));
                let (mut t, rx) = progress(t);
                let last_saved = t.train(RUN).unwrap();
                let stats: Vec<EpochStats> = rx.try_iter().collect();
                (last_saved, stats)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let (leader_saved, leader_stats) = &results[0];
    let (follower_saved, follower_stats) = &results[1];
    // A 0.5 improvement threshold never triggers after the first epoch.
    assert_eq!(leader_stats.len(), 3);
    assert_eq!(*leader_saved, Some(2));
    assert_eq!(*follower_saved, None);
    let losses = |s: &[EpochStats]| s.iter().map(|e| (e.epoch, e.val_loss_relative)).collect::<Vec<_>>();
    assert_eq!(losses(leader_stats), losses(follower_stats));
}

#[test]
fn only_the_leader_writes_artifacts() {
    let root = tempdir().unwrap();
    let handles: Vec<_> = ThreadGroup::new(2)
        .into_iter()
        .map(|comm| {
            let config = config(&root.path().join(format!("rank{}", comm.rank())), 3, 2);
            thread::spawn(move || {
                let mut t = trainer(fresh_model(), Adam::new(config.learning_rate), &config, Arc::new(comm));
                t.train(RUN).unwrap();
                config
            })
        })
        .collect();
    let configs: Vec<TrainConfig> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(configs[0].snapshot_path.exists());
    assert!(!files_under(&configs[0].log_dir).is_empty());
    assert!(!configs[1].snapshot_path.exists());
    assert!(files_under(&configs[1].log_dir).is_empty());
}
