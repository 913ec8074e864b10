use serde::{Deserialize, Serialize};

/// Per-epoch summary, logged by the leader and sent to the trainer's
/// progress channel when one is attached.
///
/// Losses are global: every rank reports the same values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// 0-based epoch index.
    pub epoch: usize,
    /// Epoch budget of the run.
    pub total_epochs: usize,
    pub train_loss_relative: f64,
    pub train_loss_absolute: f64,
    pub val_loss_relative: f64,
    pub val_loss_absolute: f64,
    /// Learning rate after this epoch's scheduler step.
    pub learning_rate: f64,
    /// Wall-clock duration of the train and validation phases in milliseconds.
    pub elapsed_ms: u64,
}
