use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Per-epoch losses of one run, in epoch order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LossHistory {
    pub train_loss_relative: Vec<f64>,
    pub train_loss_absolute: Vec<f64>,
    pub val_loss_relative: Vec<f64>,
    pub val_loss_absolute: Vec<f64>,
}

impl LossHistory {
    pub fn new() -> LossHistory {
        LossHistory::default()
    }

    pub fn push(&mut self, train_rel: f64, train_abs: f64, val_rel: f64, val_abs: f64) {
        self.train_loss_relative.push(train_rel);
        self.train_loss_absolute.push(train_abs);
        self.val_loss_relative.push(val_rel);
        self.val_loss_absolute.push(val_abs);
    }

    /// Keeps the first `epochs` entries of every column.
    pub fn truncate(&mut self, epochs: usize) {
        self.train_loss_relative.truncate(epochs);
        self.train_loss_absolute.truncate(epochs);
        self.val_loss_relative.truncate(epochs);
        self.val_loss_absolute.truncate(epochs);
    }

    /// Epochs recorded so far.
    pub fn len(&self) -> usize {
        self.val_loss_relative.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<LossHistory> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
