use crate::dist::Communicator;
use crate::error::{Result, TrainError};

/// Weighted mean of a scalar metric over one phase of an epoch.
#[derive(Debug, Clone)]
pub struct RunningAverage {
    name: &'static str,
    sum: f64,
    weight: f64,
}

impl RunningAverage {
    pub fn new(name: &'static str) -> RunningAverage {
        RunningAverage {
            name,
            sum: 0.0,
            weight: 0.0,
        }
    }

    /// Adds `value` observed over `weight` samples.
    pub fn update(&mut self, value: f64, weight: f64) -> Result<()> {
        if weight.is_nan() || weight <= 0.0 {
            return Err(TrainError::InvalidWeight(weight));
        }
        self.sum += value * weight;
        self.weight += weight;
        Ok(())
    }

    pub fn avg(&self) -> Result<f64> {
        if self.weight == 0.0 {
            return Err(TrainError::MetricUndefined(self.name));
        }
        Ok(self.sum / self.weight)
    }

    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.weight = 0.0;
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Replaces the local accumulator with the sum over all ranks, turning
    /// the average into the global one.
    pub fn merge_global(&mut self, comm: &dyn Communicator) -> Result<()> {
        let mut buf = [self.sum, self.weight];
        comm.all_reduce_sum(&mut buf)?;
        self.sum = buf[0];
        self.weight = buf[1];
        Ok(())
    }
}
