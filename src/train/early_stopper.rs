/// Stops training once the validation loss has failed to improve by more
/// than `min_delta` for `patience` consecutive epochs.
#[derive(Debug, Clone)]
pub struct EarlyStopper {
    patience: usize,
    min_delta: f64,
    counter: usize,
    min_validation_loss: f64,
}

impl EarlyStopper {
    pub fn new(patience: usize, min_delta: f64) -> EarlyStopper {
        EarlyStopper {
            patience,
            min_delta,
            counter: 0,
            min_validation_loss: f64::INFINITY,
        }
    }

    /// Records one epoch's loss and reports whether to stop.
    pub fn early_stop(&mut self, validation_loss: f64) -> bool {
        if validation_loss < self.min_validation_loss - self.min_delta {
            self.min_validation_loss = validation_loss;
            self.counter = 0;
            return false;
        }
        self.counter += 1;
        self.counter >= self.patience
    }

    pub fn best(&self) -> f64 {
        self.min_validation_loss
    }

    pub fn counter(&self) -> usize {
        self.counter
    }
}
