use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::checkpoint::{ArtifactLayout, CheckpointStore, LossHistory, Snapshot};
use crate::config::TrainConfig;
use crate::data::{DataLoader, Dataset};
use crate::dist::Communicator;
use crate::error::{Result, TrainError};
use crate::loss::{loss_criterion, relative_loss_gradient, LossWeights};
use crate::model::{DistributedModel, WaveField, WaveModel};
use crate::optim::{Optimizer, ReduceLrOnPlateau};
use crate::train::early_stopper::EarlyStopper;
use crate::train::epoch_stats::EpochStats;
use crate::train::running_average::RunningAverage;

/// Relative and absolute loss of one phase.
struct PhaseLoss {
    relative: RunningAverage,
    absolute: RunningAverage,
}

impl PhaseLoss {
    fn new(relative: &'static str, absolute: &'static str) -> PhaseLoss {
        PhaseLoss {
            relative: RunningAverage::new(relative),
            absolute: RunningAverage::new(absolute),
        }
    }

    fn update(&mut self, predictions: &[WaveField], targets: &[WaveField], weights: LossWeights) -> Result<()> {
        let n = predictions.len() as f64;
        self.relative.update(loss_criterion(predictions, targets, weights, true), n)?;
        self.absolute.update(loss_criterion(predictions, targets, weights, false), n)
    }

    /// Global `(relative, absolute)` averages over every rank's samples.
    fn global(mut self, comm: &dyn Communicator) -> Result<(f64, f64)> {
        self.relative.merge_global(comm)?;
        self.absolute.merge_global(comm)?;
        Ok((self.relative.avg()?, self.absolute.avg()?))
    }
}

/// Drives the epoch loop of one rank.
///
/// Every rank runs the same loop over its own data shard. Decisions that end
/// or shape the run (scheduler, best model, early stop) are taken from
/// metrics reduced over the whole group, so all ranks agree on them and
/// leave the loop at the same epoch. Only the leader writes artifacts.
pub struct Trainer<M, D, O> {
    model: DistributedModel<M>,
    train_data: DataLoader<D>,
    val_data: DataLoader<D>,
    optimizer: O,
    store: CheckpointStore,
    comm: Arc<dyn Communicator>,
    config: TrainConfig,
    local_rank: usize,
    epochs_run: usize,
    history: LossHistory,
    progress_tx: Option<mpsc::Sender<EpochStats>>,
}

impl<M: WaveModel, D: Dataset, O: Optimizer> Trainer<M, D, O> {
    /// Restores the snapshot at `config.snapshot_path` into `model` when one
    /// exists, then wraps the model for data-parallel training.
    ///
    /// `config` is validated first; an invalid one is a `Config` error.
    pub fn new(
        mut model: M,
        train_data: DataLoader<D>,
        optimizer: O,
        val_data: DataLoader<D>,
        config: &TrainConfig,
        comm: Arc<dyn Communicator>,
        local_rank: usize,
    ) -> Result<Trainer<M, D, O>> {
        config.validate()?;
        let store = CheckpointStore::new(
            ArtifactLayout::new(&config.log_dir),
            &config.snapshot_path,
            comm.is_leader(),
        );

        let mut epochs_run = 0;
        let mut history = LossHistory::new();
        if let Some(snapshot) = store.load_snapshot()? {
            model
                .load_state_dict(&snapshot.model_state)
                .map_err(|source| TrainError::SnapshotLoad {
                    path: config.snapshot_path.clone(),
                    source: Box::new(source),
                })?;
            epochs_run = snapshot.epochs_run;
            // The snapshot epoch itself runs again.
            history = snapshot.loss_history;
            history.truncate(epochs_run);
            info!(local_rank, epoch = epochs_run, "resuming training from snapshot");
        }

        let model = DistributedModel::wrap(model, Arc::clone(&comm))?;
        Ok(Trainer {
            model,
            train_data,
            val_data,
            optimizer,
            store,
            comm,
            config: config.clone(),
            local_rank,
            epochs_run,
            history,
            progress_tx: None,
        })
    }

    /// Sends one [`EpochStats`] per completed epoch to `tx`.
    pub fn with_progress(mut self, tx: mpsc::Sender<EpochStats>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    /// First epoch the next call to [`Trainer::train`] runs.
    pub fn epochs_run(&self) -> usize {
        self.epochs_run
    }

    /// Losses of every epoch completed so far, restored ones included.
    pub fn history(&self) -> &LossHistory {
        &self.history
    }

    pub fn model(&self) -> &DistributedModel<M> {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model.into_inner()
    }

    /// Runs epochs `epochs_run..config.epochs`, or fewer on early stop.
    ///
    /// Returns on the leader the last epoch whose loss history was saved,
    /// and `None` on every other rank.
    pub fn train(&mut self, name: &str) -> Result<Option<usize>> {
        let weights = self.config.loss_weights;
        let total_epochs = self.config.epochs;
        let mut scheduler = ReduceLrOnPlateau::new(
            self.optimizer.learning_rate(),
            self.config.lr_factor,
            self.config.lr_patience,
        );
        let mut stopper = EarlyStopper::new(self.config.early_stop_patience, self.config.early_stop_min_delta);
        let mut best_loss = f64::INFINITY;
        let mut last_epoch_saved = None;
        let mut last_epoch = None;

        for ep in self.epochs_run..total_epochs {
            let started = Instant::now();
            self.train_data.set_epoch(ep);
            debug!(
                rank = self.comm.rank(),
                device = self.local_rank,
                epoch = ep,
                batch_size = self.train_data.batch_size(),
                steps = self.train_data.len(),
                "epoch started"
            );

            let (train_rel, train_abs) = self.train_phase(weights)?.global(self.comm.as_ref())?;
            let (val_rel, val_abs) = self.validation_phase(weights)?.global(self.comm.as_ref())?;
            self.history.push(train_rel, train_abs, val_rel, val_abs);
            last_epoch = Some(ep);
            self.epochs_run = ep + 1;
            if !val_rel.is_finite() {
                warn!(epoch = ep, val_rel, "validation loss is not finite");
            }

            if let Some(lr) = scheduler.step(val_rel) {
                self.optimizer.set_learning_rate(lr);
                info!(epoch = ep, lr, "reducing learning rate");
            }

            let stats = EpochStats {
                epoch: ep,
                total_epochs,
                train_loss_relative: train_rel,
                train_loss_absolute: train_abs,
                val_loss_relative: val_rel,
                val_loss_absolute: val_abs,
                learning_rate: self.optimizer.learning_rate(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
            self.report(&stats);

            if val_rel < best_loss {
                best_loss = val_rel;
                self.store.save_best_model(name, total_epochs, &self.model.state_dict())?;
            }

            if ep % self.config.save_every == 0 {
                if self.store.save_intermediate_history(name, ep, total_epochs, &self.history)? {
                    last_epoch_saved = Some(ep);
                }
                self.store.save_snapshot(&Snapshot {
                    model_state: self.model.state_dict(),
                    epochs_run: ep,
                    loss_history: self.history.clone(),
                })?;
            }

            if stopper.early_stop(val_rel) {
                info!(epoch = ep, best = stopper.best(), "early stopping");
                break;
            }
        }

        let Some(last_epoch) = last_epoch else {
            info!(epochs_run = self.epochs_run, total_epochs, "no epochs left to run");
            return Ok(None);
        };
        if self.store.save_final_history(name, last_epoch + 1, &self.history)? {
            Ok(last_epoch_saved)
        } else {
            Ok(None)
        }
    }

    fn train_phase(&mut self, weights: LossWeights) -> Result<PhaseLoss> {
        self.model.set_training(true);
        let mut losses = PhaseLoss::new("train_loss_relative", "train_loss_absolute");

        for batch in self.train_data.iter() {
            let batch = batch?;
            let batch_size = batch.len();
            self.model.zero_grad();
            let mut predictions = Vec::with_capacity(batch_size);
            let mut targets = Vec::with_capacity(batch_size);
            for sample in batch {
                let prediction = self.model.forward(&sample.input);
                let grad = relative_loss_gradient(&prediction, &sample.target, weights, batch_size);
                self.model.backward(&grad);
                predictions.push(prediction);
                targets.push(sample.target);
            }
            losses.update(&predictions, &targets, weights)?;

            self.model.sync_gradients()?;
            self.optimizer.step(self.model.parameters_mut());
        }
        Ok(losses)
    }

    fn validation_phase(&mut self, weights: LossWeights) -> Result<PhaseLoss> {
        self.model.set_training(false);
        let mut losses = PhaseLoss::new("val_loss_relative", "val_loss_absolute");

        for batch in self.val_data.iter() {
            let batch = batch?;
            let (predictions, targets): (Vec<WaveField>, Vec<WaveField>) = batch
                .into_iter()
                .map(|sample| (self.model.forward(&sample.input), sample.target))
                .unzip();
            losses.update(&predictions, &targets, weights)?;
        }
        Ok(losses)
    }

    fn report(&mut self, stats: &EpochStats) {
        if self.comm.is_leader() {
            info!(
                epoch = stats.epoch + 1,
                total = stats.total_epochs,
                elapsed_ms = stats.elapsed_ms,
                train_rel = stats.train_loss_relative,
                val_rel = stats.val_loss_relative,
                train_abs = stats.train_loss_absolute,
                val_abs = stats.val_loss_absolute,
                lr = stats.learning_rate,
                "epoch finished"
            );
        }
        if let Some(tx) = &self.progress_tx {
            if tx.send(stats.clone()).is_err() {
                debug!("progress receiver dropped");
                self.progress_tx = None;
            }
        }
    }
}
