use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};
use crate::loss::l1::L1Loss;
use crate::loss::l2::L2Loss;
use crate::model::wave_field::WaveField;

const CHANNELS: f64 = 3.0;

/// Weights of the L1 and L2 terms, in that order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossWeights {
    pub l1: f64,
    pub l2: f64,
}

impl LossWeights {
    pub fn new(l1: f64, l2: f64) -> LossWeights {
        LossWeights { l1, l2 }
    }

    /// Parses the two-element `[l1, l2]` vector given on the command line.
    pub fn from_slice(weights: &[f64]) -> Result<LossWeights> {
        match weights {
            [l1, l2] if l1.is_finite() && l2.is_finite() => Ok(LossWeights::new(*l1, *l2)),
            [_, _] => Err(TrainError::Config("loss weights must be finite".into())),
            _ => Err(TrainError::Config(format!(
                "expected two loss weights (L1, L2), got {}",
                weights.len()
            ))),
        }
    }
}

impl Default for LossWeights {
    fn default() -> Self {
        LossWeights::new(1.0, 0.0)
    }
}

/// Loss of one sample: the weighted L1/L2 mix averaged over E, N and Z.
pub fn sample_loss(prediction: &WaveField, target: &WaveField, weights: LossWeights, relative: bool) -> f64 {
    prediction
        .channels()
        .iter()
        .zip(target.channels().iter())
        .map(|(p, t)| {
            if relative {
                weights.l1 * L1Loss::relative(p, t) + weights.l2 * L2Loss::relative(p, t)
            } else {
                weights.l1 * L1Loss::absolute(p, t) + weights.l2 * L2Loss::absolute(p, t)
            }
        })
        .sum::<f64>()
        / CHANNELS
}

/// Batch loss: the mean of [`sample_loss`] over paired predictions and targets.
///
/// The relative variant drives gradients and every scheduling decision;
/// the absolute variant is reported only.
pub fn loss_criterion(
    predictions: &[WaveField],
    targets: &[WaveField],
    weights: LossWeights,
    relative: bool,
) -> f64 {
    assert_eq!(predictions.len(), targets.len(), "one target per prediction");
    if predictions.is_empty() {
        return 0.0;
    }
    predictions
        .iter()
        .zip(targets.iter())
        .map(|(p, t)| sample_loss(p, t, weights, relative))
        .sum::<f64>()
        / predictions.len() as f64
}

/// ∂(relative batch loss)/∂prediction for one sample of a batch of
/// `batch_size` samples.
pub fn relative_loss_gradient(
    prediction: &WaveField,
    target: &WaveField,
    weights: LossWeights,
    batch_size: usize,
) -> WaveField {
    let scale = 1.0 / (CHANNELS * batch_size.max(1) as f64);
    let channel = |p: &[f64], t: &[f64]| -> Vec<f64> {
        let mut grad = vec![0.0; p.len()];
        if weights.l1 != 0.0 {
            for (g, d) in grad.iter_mut().zip(L1Loss::relative_derivative(p, t)) {
                *g += weights.l1 * d;
            }
        }
        if weights.l2 != 0.0 {
            for (g, d) in grad.iter_mut().zip(L2Loss::relative_derivative(p, t)) {
                *g += weights.l2 * d;
            }
        }
        grad.iter_mut().for_each(|g| *g *= scale);
        grad
    };
    WaveField::new(
        channel(&prediction.e, &target.e),
        channel(&prediction.n, &target.n),
        channel(&prediction.z, &target.z),
    )
}
